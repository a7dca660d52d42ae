use anyhow::{ensure, Result};
use topology_core::{
    build_graph, is_valid_label, DiscoverWorkloads, Graph, GraphBuilder, NamespaceSelector,
    NodeLabels, QueryMetrics, QueryRange, TimeWindow, Workloads,
};
use topology_k8s_api::Selector;
use topology_metrics::{
    self as metrics, ClientCache, EdgeMetrics, EdgeQuery, Prometheus, ServiceMetrics,
    WorkloadMetrics,
};
use tracing::{info, instrument};

/// Correlates a namespace's inventory with its observed traffic.
///
/// Every request is served independently: the inventory and the traffic vector are fetched
/// concurrently and folded into a fresh graph. Only metrics clients are shared across requests.
#[derive(Debug)]
pub struct TopologyService<W, M = Prometheus> {
    inventory: W,
    metrics: ClientCache<M>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphRequest {
    pub namespace: String,
    pub window: TimeWindow,
    /// Overrides the default metrics backend.
    pub metrics_url: Option<String>,
    pub inject_service_nodes: bool,
}

/// Requests the graph of traffic into and out of a single node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeGraphRequest {
    pub namespace: String,
    pub node: NodeRef,
    pub window: TimeWindow,
    pub metrics_url: Option<String>,
    pub inject_service_nodes: bool,
}

/// Identifies the node a graph is anchored on. An unset namespace refers to the graph's.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeRef {
    pub namespace: String,
    pub workload: String,
    pub service: String,
    pub app: String,
    pub version: String,
}

// === impl TopologyService ===

impl<W, M> TopologyService<W, M>
where
    W: DiscoverWorkloads + Send + Sync,
    M: QueryMetrics + Send + Sync,
{
    pub fn new(inventory: W, metrics: ClientCache<M>) -> Self {
        Self { inventory, metrics }
    }

    /// Builds the graph of all traffic involving `namespace`.
    #[instrument(skip_all, fields(ns = %req.namespace))]
    pub async fn namespace_graph(&self, req: &GraphRequest) -> Result<Graph> {
        ensure!(!req.namespace.is_empty(), "a namespace must be specified");
        let client = self.metrics.get(req.metrics_url.as_deref())?;

        let namespaces = NamespaceSelector::from(req.namespace.as_str());
        let (workloads, samples) = tokio::try_join!(
            self.inventory.fetch_workloads(&namespaces, None),
            metrics::namespace_traffic(&*client, &req.namespace, req.window),
        )?;

        let graph = Graph::new(&req.namespace, req.window, req.inject_service_nodes);
        let graph = build_graph(graph, &samples, &workloads);
        info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Built namespace graph"
        );
        Ok(graph)
    }

    /// Builds the graph of traffic into and out of one node. The node is drawn even when no
    /// traffic involves it.
    #[instrument(
        skip_all,
        fields(ns = %req.namespace, workload = %req.node.workload, service = %req.node.service)
    )]
    pub async fn node_graph(&self, req: &NodeGraphRequest) -> Result<Graph> {
        ensure!(!req.namespace.is_empty(), "a namespace must be specified");
        ensure!(
            is_valid_label(&req.node.workload) || is_valid_label(&req.node.service),
            "a workload or service must be specified"
        );
        let client = self.metrics.get(req.metrics_url.as_deref())?;

        let node_ns = req.node.namespace_or(&req.namespace);
        let namespaces = NamespaceSelector::from(req.namespace.as_str());
        let (workloads, samples) = tokio::try_join!(
            self.inventory.fetch_workloads(&namespaces, None),
            metrics::node_traffic(
                &*client,
                node_ns,
                &req.node.workload,
                &req.node.service,
                req.window
            ),
        )?;

        let graph = Graph::new(&req.namespace, req.window, req.inject_service_nodes);
        let mut builder = GraphBuilder::new(graph, &workloads);
        builder.add_anchor(req.node.labels(node_ns));
        builder.add_samples(&samples);
        let graph = builder.finish();
        info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Built node graph"
        );
        Ok(graph)
    }

    /// Resolves the workloads deployed in `namespace`, optionally only those whose labels match
    /// `selector`.
    pub async fn workloads(&self, namespace: &str, selector: Option<&Selector>) -> Result<Workloads> {
        ensure!(!namespace.is_empty(), "a namespace must be specified");
        self.inventory
            .fetch_workloads(&NamespaceSelector::from(namespace), selector)
            .await
    }

    pub async fn workload_metrics(
        &self,
        namespace: &str,
        workload: &str,
        range: QueryRange,
        metrics_url: Option<&str>,
    ) -> Result<WorkloadMetrics> {
        let client = self.metrics.get(metrics_url)?;
        metrics::workload_metrics(&*client, namespace, workload, range).await
    }

    pub async fn service_metrics(
        &self,
        namespace: &str,
        service: &str,
        workload: Option<&str>,
        range: QueryRange,
        metrics_url: Option<&str>,
    ) -> Result<ServiceMetrics> {
        let client = self.metrics.get(metrics_url)?;
        metrics::service_metrics(&*client, namespace, service, workload, range).await
    }

    pub async fn edge_metrics(
        &self,
        edge: &EdgeQuery,
        metrics_url: Option<&str>,
    ) -> Result<EdgeMetrics> {
        let client = self.metrics.get(metrics_url)?;
        metrics::edge_metrics(&*client, edge).await
    }

    pub fn inventory(&self) -> &W {
        &self.inventory
    }

    pub fn metrics_clients(&self) -> &ClientCache<M> {
        &self.metrics
    }
}

// === impl NodeRef ===

impl NodeRef {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            default
        } else {
            &self.namespace
        }
    }

    pub fn labels<'a>(&'a self, namespace: &'a str) -> NodeLabels<'a> {
        NodeLabels {
            namespace,
            workload: &self.workload,
            app: &self.app,
            version: &self.version,
            service: &self.service,
        }
    }
}
