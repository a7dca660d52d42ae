//! Stable node identities.
//!
//! A node's ID is a pure function of its labels so that the same workload or service observed
//! in many samples (and in many graph builds) always maps to the same node.

use serde::Serialize;
use tracing::{debug, trace};

/// The value the mesh reports for a label it could not determine.
pub const UNKNOWN: &str = "unknown";

/// Seed for the synthetic node that stands in for traffic from outside the mesh.
const UNKNOWN_SOURCE: &str = "unknown_source";

pub type NodeId = u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Workload,
    Service,
    Unknown,
}

/// The labels that identify one end of a traffic sample.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeLabels<'a> {
    pub namespace: &'a str,
    pub workload: &'a str,
    pub app: &'a str,
    pub version: &'a str,
    pub service: &'a str,
}

/// Returns true if a label value is set and not the mesh's `unknown` placeholder.
#[inline]
pub fn is_valid_label(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN
}

// === impl NodeLabels ===

impl NodeLabels<'_> {
    /// Computes the node's ID and type.
    ///
    /// - Traffic from outside the mesh (unknown namespace, workload and app with no service)
    ///   hashes to a fixed ID and is typed `Unknown`; callers do not build a node for it.
    /// - If neither the workload nor the service is valid, no ID can be generated: `(0, Unknown)`.
    /// - A node with only a valid service is a `Service` node keyed by namespace and service.
    /// - Otherwise the node is a `Workload` keyed by namespace and workload. App and version do
    ///   not participate so that all observations of a workload merge into one node.
    pub fn generate_id(&self) -> (NodeId, NodeType) {
        let Self {
            namespace,
            workload,
            app,
            version,
            service,
        } = *self;

        if namespace == UNKNOWN && workload == UNKNOWN && app == UNKNOWN && service.is_empty() {
            trace!(%namespace, %workload, %app, %version, "Unknown source");
            return (fnv1a(UNKNOWN_SOURCE.as_bytes()), NodeType::Unknown);
        }

        let workload_ok = is_valid_label(workload);
        let service_ok = is_valid_label(service);

        if !workload_ok && !service_ok {
            debug!(%namespace, %workload, %app, %version, %service, "Failed to generate node ID");
            return (0, NodeType::Unknown);
        }

        if !workload_ok {
            let key = format!("svc_{namespace}_{service}");
            return (fnv1a(key.as_bytes()), NodeType::Service);
        }

        let key = format!("wl_{namespace}_{workload}");
        (fnv1a(key.as_bytes()), NodeType::Workload)
    }
}

/// 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(PRIME)
    })
}
