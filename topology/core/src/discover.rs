use crate::{
    sample::{Matrix, Vector},
    workload::Workloads,
};
use anyhow::Result;
use topology_k8s_api::Selector;

/// Resolves the workloads deployed in a namespace.
#[async_trait::async_trait]
pub trait DiscoverWorkloads {
    async fn fetch_workloads(
        &self,
        namespaces: &NamespaceSelector,
        labels: Option<&Selector>,
    ) -> Result<Workloads>;
}

/// Evaluates metric queries.
#[async_trait::async_trait]
pub trait QueryMetrics {
    /// Evaluates an instant query at `time` (unix seconds).
    async fn query(&self, query: &str, time: i64) -> Result<Vector>;

    async fn query_range(&self, query: &str, range: QueryRange) -> Result<Matrix>;
}

/// The namespaces an inventory is resolved over.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceSelector {
    All,
    Namespace(String),
}

/// Bounds and resolution, in seconds, of a range query.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryRange {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

// === impl NamespaceSelector ===

impl NamespaceSelector {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

impl From<&str> for NamespaceSelector {
    fn from(ns: &str) -> Self {
        if ns.is_empty() {
            Self::All
        } else {
            Self::Namespace(ns.to_string())
        }
    }
}

impl std::fmt::Display for NamespaceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Namespace(ns) => f.write_str(ns),
        }
    }
}

#[async_trait::async_trait]
impl<T: DiscoverWorkloads + Send + Sync + ?Sized> DiscoverWorkloads for std::sync::Arc<T> {
    async fn fetch_workloads(
        &self,
        namespaces: &NamespaceSelector,
        labels: Option<&Selector>,
    ) -> Result<Workloads> {
        (**self).fetch_workloads(namespaces, labels).await
    }
}

#[async_trait::async_trait]
impl<T: QueryMetrics + Send + Sync + ?Sized> QueryMetrics for std::sync::Arc<T> {
    async fn query(&self, query: &str, time: i64) -> Result<Vector> {
        (**self).query(query, time).await
    }

    async fn query_range(&self, query: &str, range: QueryRange) -> Result<Matrix> {
        (**self).query_range(query, range).await
    }
}
