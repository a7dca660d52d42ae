use crate::{
    edge_metrics, namespace_traffic, node_traffic, service_metrics, workload_metrics, EdgeQuery,
};
use anyhow::{bail, Result};
use maplit::{btreemap, convert_args};
use parking_lot::Mutex;
use topology_core::{
    LabelSet, Matrix, NodeType, QueryMetrics, QueryRange, RequestCount, Sample, SamplePair,
    SampleStream, TimeWindow, Vector,
};

const RANGE: QueryRange = QueryRange {
    start: 1_700_000_000,
    end: 1_700_000_600,
    step: 60,
};

/// Answers each query with the response registered for the first pattern the query contains.
#[derive(Debug, Default)]
struct FakeMetrics {
    vectors: Vec<(&'static str, Vector)>,
    matrices: Vec<(&'static str, Matrix)>,
    failing: Vec<&'static str>,
    queries: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl QueryMetrics for FakeMetrics {
    async fn query(&self, query: &str, time: i64) -> Result<Vector> {
        assert_eq!(time, RANGE.end, "instant queries are evaluated at the end of the window");
        self.record(query)?;
        Ok(self
            .vectors
            .iter()
            .find(|(pattern, _)| query.contains(pattern))
            .map(|(_, v)| v.clone())
            .unwrap_or_default())
    }

    async fn query_range(&self, query: &str, range: QueryRange) -> Result<Matrix> {
        assert_eq!(range, RANGE);
        self.record(query)?;
        Ok(self
            .matrices
            .iter()
            .find(|(pattern, _)| query.contains(pattern))
            .map(|(_, m)| m.clone())
            .unwrap_or_default())
    }
}

impl FakeMetrics {
    fn record(&self, query: &str) -> Result<()> {
        self.queries.lock().push(query.to_string());
        if let Some(pattern) = self.failing.iter().find(|p| query.contains(*p)) {
            bail!("query matching {pattern:?} failed");
        }
        Ok(())
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn codes(counts: &[(&str, f64)]) -> Vector {
    counts
        .iter()
        .map(|&(code, n)| Sample::new(labels(&[("response_code", code)]), n))
        .collect()
}

fn series(metric: LabelSet, values: &[f64]) -> SampleStream {
    SampleStream {
        metric,
        values: values
            .iter()
            .enumerate()
            .map(|(i, &value)| SamplePair {
                timestamp: RANGE.start + i as i64 * RANGE.step,
                value,
            })
            .collect(),
    }
}

fn window() -> TimeWindow {
    TimeWindow::new(RANGE.start, RANGE.end)
}

#[tokio::test]
async fn namespace_traffic_concatenates_every_query() {
    let metrics = FakeMetrics {
        vectors: vec![
            (
                r#"source_workload="unknown""#,
                vec![Sample::new(labels(&[("source_workload", "unknown")]), 1.0)],
            ),
            (
                r#"reporter="source",source_workload_namespace="bookinfo""#,
                vec![
                    Sample::new(labels(&[("source_workload", "productpage-v1")]), 2.0),
                    Sample::new(labels(&[("source_workload", "reviews-v2")]), 3.0),
                ],
            ),
        ],
        ..Default::default()
    };

    let samples = namespace_traffic(&metrics, "bookinfo", window()).await.unwrap();
    assert_eq!(
        samples.iter().map(|s| s.value).collect::<Vec<_>>(),
        vec![1.0, 2.0, 3.0]
    );
    assert_eq!(metrics.queries().len(), 5);
    assert!(metrics.queries().iter().all(|q| q.contains("[600s]")));
}

#[tokio::test]
async fn traffic_fails_when_any_query_fails() {
    let metrics = FakeMetrics {
        failing: vec![r#"connection_security_policy!="none""#],
        ..Default::default()
    };
    let error = namespace_traffic(&metrics, "bookinfo", window())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("failed"), "{error}");
}

#[tokio::test]
async fn node_traffic_includes_outbound_for_workloads() {
    let metrics = FakeMetrics::default();
    node_traffic(&metrics, "bookinfo", "reviews-v1", "", window())
        .await
        .unwrap();
    assert_eq!(metrics.queries().len(), 2);

    let metrics = FakeMetrics::default();
    node_traffic(&metrics, "bookinfo", "", "details", window())
        .await
        .unwrap();
    assert_eq!(metrics.queries().len(), 1);
}

#[tokio::test]
async fn workload_summary() {
    let metrics = FakeMetrics {
        vectors: vec![
            (
                "by (destination_service_name)",
                vec![
                    Sample::new(labels(&[("destination_service_name", "reviews")]), 10.0),
                    Sample::new(LabelSet::new(), 1.0),
                ],
            ),
            (
                r#"destination_workload="reviews-v1"}[600s])) by (response_code)"#,
                codes(&[("200", 40.0), ("201", 2.0), ("503", 3.0), ("404", 1.0)]),
            ),
            (
                r#"source_workload="reviews-v1"}[600s])) by (response_code)"#,
                codes(&[("200", 7.9), ("302", 1.0)]),
            ),
        ],
        matrices: vec![
            (
                r#"destination_workload="reviews-v1",response_code=~"[5|4].*"}[60s]"#,
                vec![series(LabelSet::new(), &[0.1, 0.0])],
            ),
            (
                r#"sum(rate(istio_requests_total{reporter="source",destination_workload_namespace="bookinfo",destination_workload="reviews-v1"}[60s]))"#,
                vec![series(LabelSet::new(), &[1.5, 2.5])],
            ),
            (
                "histogram_quantile(0.95,",
                vec![series(LabelSet::new(), &[f64::NAN])],
            ),
        ],
        failing: vec!["histogram_quantile(0.99,"],
        ..Default::default()
    };

    let summary = workload_metrics(&metrics, "bookinfo", "reviews-v1", RANGE)
        .await
        .unwrap();
    assert_eq!(summary.node_type, NodeType::Workload);
    assert_eq!(summary.services, vec!["reviews"]);
    assert_eq!(
        summary.request_count_in,
        RequestCount {
            http_2xx: 42,
            http_3xx: 0,
            http_4xx: 1,
            http_5xx: 3,
        }
    );
    assert_eq!(summary.request_count_out.http_2xx, 7);
    assert_eq!(summary.request_count_out.http_3xx, 1);
    assert_eq!(
        summary.request_rate_in.iter().map(|p| p.value).collect::<Vec<_>>(),
        vec![1.5, 2.5]
    );
    assert_eq!(summary.error_rate_in.len(), 2);
    assert!(summary.request_rate_out.is_empty());
    assert_eq!(
        summary.request_response_time.keys().collect::<Vec<_>>(),
        vec!["0.95"],
        "failed and empty latency series are omitted"
    );

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["type"], "workload");
    assert_eq!(json["request_response_time"]["0.95"][0][1], 0.0);
    assert!(json.get("request_rate_out").is_none());
}

#[tokio::test]
async fn workload_summary_fails_with_its_counts() {
    let metrics = FakeMetrics {
        failing: vec!["by (response_code)"],
        ..Default::default()
    };
    assert!(workload_metrics(&metrics, "bookinfo", "reviews-v1", RANGE)
        .await
        .is_err());

    // Observed services and latencies are best effort.
    let metrics = FakeMetrics {
        failing: vec!["by (destination_service_name)", "histogram_quantile"],
        ..Default::default()
    };
    let summary = workload_metrics(&metrics, "bookinfo", "reviews-v1", RANGE)
        .await
        .unwrap();
    assert!(summary.services.is_empty());
    assert!(summary.request_response_time.is_empty());
}

#[tokio::test]
async fn service_summary_filters_by_workload() {
    let metrics = FakeMetrics {
        vectors: vec![(
            "by (destination_workload)",
            vec![
                Sample::new(labels(&[("destination_workload", "reviews-v1")]), 1.0),
                Sample::new(labels(&[("destination_workload", "reviews-v2")]), 1.0),
            ],
        )],
        ..Default::default()
    };

    let summary = service_metrics(&metrics, "bookinfo", "reviews", Some("reviews-v2"), RANGE)
        .await
        .unwrap();
    assert_eq!(summary.node_type, NodeType::Service);
    assert_eq!(summary.workloads, vec!["reviews-v1", "reviews-v2"]);

    let queries = metrics.queries();
    let counts = queries
        .iter()
        .find(|q| q.ends_with("by (response_code)"))
        .unwrap();
    assert!(counts.contains(r#"destination_service_name="reviews",destination_workload="reviews-v2"}"#));
    let observed = queries
        .iter()
        .find(|q| q.ends_with("by (destination_workload)"))
        .unwrap();
    assert!(!observed.contains(r#"destination_workload="reviews-v2""#));
}

#[tokio::test]
async fn edge_summary() {
    let latency = vec![
        series(
            convert_args!(btreemap!("source_workload" => "productpage-v1")),
            &[0.012],
        ),
        series(
            convert_args!(btreemap!("source_workload" => "reviews-v2")),
            &[0.5],
        ),
    ];
    let metrics = FakeMetrics {
        vectors: vec![("by (response_code)", codes(&[("200", 5.0), ("500", 2.0)]))],
        matrices: vec![("histogram_quantile(0.5,", latency)],
        ..Default::default()
    };
    let edge = EdgeQuery {
        source_namespace: "bookinfo".to_string(),
        target_namespace: "bookinfo".to_string(),
        source_workload: "productpage-v1".to_string(),
        target_service: "reviews".to_string(),
        start_time: RANGE.start,
        end_time: RANGE.end,
        step: RANGE.step,
        ..Default::default()
    };

    let summary = edge_metrics(&metrics, &edge).await.unwrap();
    assert_eq!(summary.request_count.http_2xx, 5);
    assert_eq!(summary.request_count.http_5xx, 2);
    assert_eq!(summary.request_response_time["0.5"][0].value, 0.012);
    assert_eq!(summary.query_options, edge);

    let queries = metrics.queries();
    assert!(queries.iter().any(|q| q.contains(
        r#"{reporter="source",source_workload="productpage-v1",source_workload_namespace="bookinfo",destination_service_name="reviews",destination_service_namespace="bookinfo"}"#
    )));
    assert!(queries
        .iter()
        .filter(|q| q.contains("istio_request_duration_seconds"))
        .all(|q| q.contains("source_workload") && q.contains(r#"reporter="source""#)));
}
