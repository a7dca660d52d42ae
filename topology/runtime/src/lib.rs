//! Topology service
//!
//! Serves namespace and node graphs by fetching a namespace's inventory and its mesh traffic
//! concurrently and folding them together, along with metric summaries of individual workloads,
//! services and edges.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use topology_core as core;
pub use topology_k8s_api as k8s;
pub use topology_k8s_inventory as inventory;
pub use topology_metrics as metrics;

mod args;
mod service;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    service::{GraphRequest, NodeGraphRequest, NodeRef, TopologyService},
};
