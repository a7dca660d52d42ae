use crate::{GraphRequest, NodeGraphRequest, NodeRef, TopologyService};
use anyhow::{bail, Result};
use maplit::{btreemap, convert_args};
use parking_lot::Mutex;
use std::sync::Arc;
use topology_core::{
    ControllerKind, DiscoverWorkloads, LabelSet, Labels, Matrix, NamespaceSelector, NodeLabels,
    NodeType, Pod, QueryMetrics, QueryRange, Sample, TimeWindow, Vector, Workload, Workloads,
};
use topology_k8s_api::Selector;
use topology_metrics::ClientCache;

const NS: &str = "bookinfo";
const DEFAULT_URL: &str = "http://prometheus.istio-system:9090";
const WINDOW: TimeWindow = TimeWindow {
    start: 1_700_000_000,
    end: 1_700_000_600,
};

/// Traffic sent by the namespace's workloads.
const NAMESPACE_SOURCES: &str = r#"reporter="source",source_workload_namespace="bookinfo"}"#;

/// Traffic into reviews-v1.
const REVIEWS_INBOUND: &str = r#"destination_workload="reviews-v1"}"#;

#[derive(Debug, Default)]
struct FakeInventory {
    workloads: Workloads,
    failing: bool,
    requests: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl DiscoverWorkloads for FakeInventory {
    async fn fetch_workloads(
        &self,
        namespaces: &NamespaceSelector,
        labels: Option<&Selector>,
    ) -> Result<Workloads> {
        self.requests.lock().push(namespaces.to_string());
        if self.failing {
            bail!("pods is forbidden: cannot list resource \"pods\" in namespace \"{namespaces}\"");
        }
        Ok(self
            .workloads
            .iter()
            .filter(|w| labels.map_or(true, |s| s.matches(&w.labels)))
            .cloned()
            .collect())
    }
}

/// Answers instant queries containing `pattern` with `samples` and every other query with
/// nothing.
#[derive(Clone, Debug, Default)]
struct FakeMetrics {
    pattern: &'static str,
    samples: Vector,
    failing: bool,
}

#[async_trait::async_trait]
impl QueryMetrics for FakeMetrics {
    async fn query(&self, query: &str, time: i64) -> Result<Vector> {
        assert_eq!(time, WINDOW.end);
        if self.failing {
            bail!("Post \"http://prometheus:9090/api/v1/query\": dial tcp: connection refused");
        }
        if query.contains(self.pattern) {
            return Ok(self.samples.clone());
        }
        Ok(Vector::new())
    }

    async fn query_range(&self, _: &str, _: QueryRange) -> Result<Matrix> {
        Ok(Matrix::new())
    }
}

type Service = TopologyService<FakeInventory, FakeMetrics>;

/// Builds a service whose metrics clients all answer like `metrics`, recording each URL a client
/// is created for.
fn mk_service(inventory: FakeInventory, metrics: FakeMetrics) -> (Service, Arc<Mutex<Vec<String>>>) {
    let urls = Arc::new(Mutex::new(Vec::new()));
    let cache = {
        let urls = urls.clone();
        ClientCache::new(DEFAULT_URL, move |url| {
            urls.lock().push(url.to_string());
            Ok(metrics.clone())
        })
    };
    (TopologyService::new(inventory, cache), urls)
}

fn mk_sample(source: &str, service: &str, destination: &str, code: &str, value: f64) -> Sample {
    let metric: LabelSet = convert_args!(btreemap!(
        "source_workload_namespace" => NS,
        "source_workload" => source,
        "source_app" => app_of(source),
        "source_version" => "v1",
        "destination_service_namespace" => NS,
        "destination_service_name" => service,
        "destination_workload" => destination,
        "destination_app" => app_of(destination),
        "destination_version" => "v1",
        "response_code" => code,
        "reporter" => "source",
    ));
    Sample::new(metric, value)
}

fn app_of(workload: &str) -> &str {
    workload.split('-').next().unwrap_or(workload)
}

fn mk_workload(name: &str) -> Workload {
    let mut pod = Pod {
        name: format!("{name}-7bf8c9b6d-4kqjz"),
        status: Pod::RUNNING.to_string(),
        ..Pod::default()
    };
    pod.set_labels(Labels::from_iter([
        ("app".to_string(), app_of(name).to_string()),
        ("version".to_string(), "v1".to_string()),
    ]));

    let mut workload = Workload::new(name, ControllerKind::Deployment);
    workload.set_labels(Labels::from_iter([(
        "app".to_string(),
        app_of(name).to_string(),
    )]));
    workload.set_pods(vec![pod]);
    workload
}

fn mk_inventory(names: &[&str]) -> FakeInventory {
    FakeInventory {
        workloads: names.iter().map(|name| mk_workload(name)).collect(),
        ..Default::default()
    }
}

fn graph_request() -> GraphRequest {
    GraphRequest {
        namespace: NS.to_string(),
        window: WINDOW,
        metrics_url: None,
        inject_service_nodes: false,
    }
}

fn node_id(workload: &str, service: &str) -> u32 {
    NodeLabels {
        namespace: NS,
        workload,
        service,
        ..NodeLabels::default()
    }
    .generate_id()
    .0
}

#[tokio::test]
async fn namespace_graph() {
    let (service, urls) = mk_service(
        mk_inventory(&["productpage-v1", "reviews-v1"]),
        FakeMetrics {
            pattern: NAMESPACE_SOURCES,
            samples: vec![
                mk_sample("productpage-v1", "reviews", "reviews-v1", "200", 3.0),
                mk_sample("productpage-v1", "reviews", "reviews-v1", "503", 2.0),
            ],
            ..Default::default()
        },
    );

    let graph = service.namespace_graph(&graph_request()).await.unwrap();
    assert_eq!(graph.namespace, NS);
    assert_eq!((graph.start_time, graph.end_time), (WINDOW.start, WINDOW.end));
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);

    let edge = &graph.edges[0];
    assert_eq!(edge.source_id, node_id("productpage-v1", ""));
    assert_eq!(edge.target_id, node_id("reviews-v1", ""));
    assert_eq!(edge.request_rate, 5.0);
    assert_eq!(edge.error_rate, 2.0);

    let root = &graph.nodes[0];
    assert!(root.is_root);
    assert_eq!(root.workload, "productpage-v1");
    assert_eq!(root.has_istio_sidecar, Some(false));

    assert_eq!(*service.requests(), vec![NS.to_string()]);
    assert_eq!(*urls.lock(), vec![DEFAULT_URL.to_string()]);
}

#[tokio::test]
async fn namespace_graph_injects_service_nodes() {
    let (service, _) = mk_service(
        mk_inventory(&["productpage-v1", "reviews-v1"]),
        FakeMetrics {
            pattern: NAMESPACE_SOURCES,
            samples: vec![mk_sample(
                "productpage-v1",
                "reviews",
                "reviews-v1",
                "200",
                3.0,
            )],
            ..Default::default()
        },
    );

    let req = GraphRequest {
        inject_service_nodes: true,
        ..graph_request()
    };
    let graph = service.namespace_graph(&req).await.unwrap();
    let reviews = node_id("", "reviews");
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(
        graph.node(reviews).map(|n| n.node_type),
        Some(NodeType::Service)
    );
    assert!(graph.edge(node_id("productpage-v1", ""), reviews).is_some());
    assert!(graph.edge(reviews, node_id("reviews-v1", "")).is_some());
}

#[tokio::test]
async fn inventory_failure_fails_the_graph() {
    let inventory = FakeInventory {
        failing: true,
        ..mk_inventory(&["reviews-v1"])
    };
    let (service, _) = mk_service(inventory, FakeMetrics::default());
    let error = service.namespace_graph(&graph_request()).await.unwrap_err();
    assert!(error.to_string().contains("forbidden"), "{error}");
}

#[tokio::test]
async fn metrics_failure_fails_the_graph() {
    let (service, _) = mk_service(
        mk_inventory(&["reviews-v1"]),
        FakeMetrics {
            failing: true,
            ..Default::default()
        },
    );
    let error = service.namespace_graph(&graph_request()).await.unwrap_err();
    assert!(error.to_string().contains("connection refused"), "{error}");
}

#[tokio::test]
async fn idle_namespace_has_an_empty_graph() {
    let (service, _) = mk_service(FakeInventory::default(), FakeMetrics::default());
    let graph = service.namespace_graph(&graph_request()).await.unwrap();
    assert!(graph.nodes.is_empty());
    assert!(graph.edges.is_empty());

    let json = serde_json::to_value(&graph).unwrap();
    assert_eq!(json["nodes"], serde_json::json!([]));
    assert_eq!(json["namespace"], NS);
}

#[tokio::test]
async fn node_graph_draws_an_idle_anchor() {
    let (service, _) = mk_service(mk_inventory(&["reviews-v1"]), FakeMetrics::default());
    let req = NodeGraphRequest {
        namespace: NS.to_string(),
        node: NodeRef {
            workload: "reviews-v1".to_string(),
            ..Default::default()
        },
        window: WINDOW,
        metrics_url: None,
        inject_service_nodes: false,
    };

    let graph = service.node_graph(&req).await.unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.edges.is_empty());
    let node = &graph.nodes[0];
    assert_eq!(node.id, node_id("reviews-v1", ""));
    assert_eq!(node.app, "reviews");
    assert_eq!(node.version, "v1");
    assert!(!node.is_root);
}

#[tokio::test]
async fn node_graph_folds_anchor_traffic() {
    let (service, _) = mk_service(
        mk_inventory(&["productpage-v1", "reviews-v1"]),
        FakeMetrics {
            pattern: REVIEWS_INBOUND,
            samples: vec![mk_sample(
                "productpage-v1",
                "reviews",
                "reviews-v1",
                "200",
                4.0,
            )],
            ..Default::default()
        },
    );
    let req = NodeGraphRequest {
        namespace: NS.to_string(),
        node: NodeRef {
            workload: "reviews-v1".to_string(),
            ..Default::default()
        },
        window: WINDOW,
        metrics_url: None,
        inject_service_nodes: false,
    };

    let graph = service.node_graph(&req).await.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    let edge = graph
        .edge(node_id("productpage-v1", ""), node_id("reviews-v1", ""))
        .expect("edge into the anchor");
    assert_eq!(edge.request_rate, 4.0);
}

#[tokio::test]
async fn node_graph_requires_a_node() {
    let (service, _) = mk_service(FakeInventory::default(), FakeMetrics::default());
    let req = NodeGraphRequest {
        namespace: NS.to_string(),
        node: NodeRef {
            workload: "unknown".to_string(),
            ..Default::default()
        },
        window: WINDOW,
        metrics_url: None,
        inject_service_nodes: false,
    };
    assert!(service.node_graph(&req).await.is_err());
    assert!(service.requests().is_empty());
}

#[tokio::test]
async fn metrics_url_overrides_the_default() {
    let (service, urls) = mk_service(FakeInventory::default(), FakeMetrics::default());
    service.namespace_graph(&graph_request()).await.unwrap();

    let req = GraphRequest {
        metrics_url: Some("http://thanos.monitoring:9090".to_string()),
        ..graph_request()
    };
    service.namespace_graph(&req).await.unwrap();
    service.namespace_graph(&req).await.unwrap();

    assert_eq!(
        *urls.lock(),
        vec![
            DEFAULT_URL.to_string(),
            "http://thanos.monitoring:9090".to_string()
        ]
    );
    assert_eq!(service.metrics_clients().len(), 2);
}

#[tokio::test]
async fn namespace_is_required() {
    let (service, _) = mk_service(FakeInventory::default(), FakeMetrics::default());
    let req = GraphRequest {
        namespace: String::new(),
        ..graph_request()
    };
    assert!(service.namespace_graph(&req).await.is_err());
    assert!(service.workloads("", None).await.is_err());
    assert!(service.requests().is_empty());
}

#[tokio::test]
async fn workloads_are_filtered_by_selector() {
    let (service, _) = mk_service(
        mk_inventory(&["productpage-v1", "reviews-v1", "reviews-v2"]),
        FakeMetrics::default(),
    );
    let selector = "app=reviews".parse::<Selector>().unwrap();
    let workloads = service.workloads(NS, Some(&selector)).await.unwrap();
    assert_eq!(
        workloads.iter().map(|w| w.name.as_str()).collect::<Vec<_>>(),
        vec!["reviews-v1", "reviews-v2"]
    );
}

#[tokio::test]
async fn workload_metrics_use_the_requested_backend() {
    let (service, urls) = mk_service(FakeInventory::default(), FakeMetrics::default());
    let range = QueryRange {
        start: WINDOW.start,
        end: WINDOW.end,
        step: 60,
    };
    let summary = service
        .workload_metrics(NS, "reviews-v1", range, Some("http://prometheus.eu:9090"))
        .await
        .unwrap();
    assert_eq!(summary.workload, "reviews-v1");
    assert_eq!(summary.request_count_in.http_2xx, 0);
    assert_eq!(*urls.lock(), vec!["http://prometheus.eu:9090".to_string()]);
}

impl Service {
    fn requests(&self) -> parking_lot::MutexGuard<'_, Vec<String>> {
        self.inventory().requests.lock()
    }
}
