//! Service topology engine
//!
//! Folds a window of mesh traffic samples into a graph of workloads and services, correlated
//! against the workloads that are actually deployed in the namespace:
//!
//! - A `Workload` is a deployable unit after collapsing controller ownership chains (e.g. the
//!   `Deployment` that owns the `ReplicaSet` that owns a `Pod`).
//! - Each traffic `Sample` names a source workload and a destination service/workload. Both ends
//!   are mapped to a stable `NodeId` so that repeated observations merge into one node.
//! - An `Edge` accumulates the request and error rates observed between two nodes.
//!
//! ```text
//! [ Sample ] -> [ NodeLabels ] -> [ Node ] <- [ Edge ] -> [ Node ]
//!                                    ^
//!                               [ Workload ]
//! ```
//!
//! This crate performs no I/O. Inventory and metrics are obtained through the
//! [`DiscoverWorkloads`] and [`QueryMetrics`] traits.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod discover;
pub mod graph;
pub mod identity;
pub mod sample;
pub mod workload;


pub use self::{
    discover::{DiscoverWorkloads, NamespaceSelector, QueryMetrics, QueryRange},
    graph::{build_graph, Edge, Graph, GraphBuilder, Node},
    identity::{is_valid_label, NodeId, NodeLabels, NodeType, UNKNOWN},
    sample::{
        LabelSet, Matrix, RequestCount, ResponseClass, Sample, SamplePair, SampleStream, Vector,
    },
    workload::{ContainerInfo, ControllerKind, Pod, Port, Reference, Service, Workload, Workloads},
};
pub use topology_k8s_api::{Labels, Selector};

/// The time range, in unix seconds, over which traffic is observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The length of the window in seconds, used as the range of rate queries.
    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }
}
