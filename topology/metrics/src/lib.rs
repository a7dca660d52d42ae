//! Mesh traffic metrics
//!
//! Builds the PromQL queries that graphs and metric summaries are computed from and evaluates
//! them against any [`QueryMetrics`] implementation, typically a [`Prometheus`] client obtained
//! from a [`ClientCache`].
//!
//! [`QueryMetrics`]: topology_core::QueryMetrics

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod client;
mod error;
pub mod histogram;
mod matchers;
pub mod summary;
pub mod traffic;

#[cfg(test)]
mod tests;

pub use self::{
    cache::ClientCache,
    client::Prometheus,
    error::Error,
    matchers::Matchers,
    summary::{
        edge_metrics, service_metrics, workload_metrics, EdgeMetrics, EdgeQuery, ServiceMetrics,
        WorkloadMetrics,
    },
    traffic::{namespace_traffic, node_traffic},
};
