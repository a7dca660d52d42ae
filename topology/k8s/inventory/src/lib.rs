//! Workload inventory resolution
//!
//! Lists pods and the controllers that manage them and collapses controller ownership chains into
//! one [`Workload`] per deployable unit:
//!
//! ```text
//! [ Pod ] -> [ ReplicaSet ] -> [ Deployment ]
//! [ Pod ] -> [ ReplicationController ] -> [ DeploymentConfig ]
//! [ Pod ] -> [ Job ] -> [ CronJob ]
//! [ Pod ] -> [ StatefulSet | DaemonSet | ... ]
//! ```
//!
//! Each workload carries the pods its template selects and the services whose selectors match its
//! labels. Resolution works on a point-in-time snapshot: every kind is listed concurrently and any
//! listing failure fails the whole resolution.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod platform;
pub mod pod;
mod resolve;
mod service;
mod workload;


pub use self::platform::Platform;
use self::platform::Snapshot;
use anyhow::Result;
use topology_core::{DiscoverWorkloads, NamespaceSelector, Workload, Workloads};
use topology_k8s_api::Selector;
use tracing::{debug, instrument};

/// Resolves workloads from a [`Platform`].
#[derive(Clone, Debug)]
pub struct Inventory<P> {
    platform: P,
}

// === impl Inventory ===

impl<P> Inventory<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }
}

#[async_trait::async_trait]
impl<P> DiscoverWorkloads for Inventory<P>
where
    P: Platform + Send + Sync,
{
    #[instrument(skip_all, fields(ns = %namespaces))]
    async fn fetch_workloads(
        &self,
        namespaces: &NamespaceSelector,
        labels: Option<&Selector>,
    ) -> Result<Workloads> {
        let snapshot = Snapshot::fetch(&self.platform, namespaces).await?;
        let workloads: Vec<Workload> = resolve::workloads(&snapshot, labels);
        debug!(workloads = workloads.len(), "Resolved inventory");
        Ok(workloads.into())
    }
}
