//! Traffic vectors that graphs are built from.
//!
//! Each query evaluates the per-second request rate over the whole window, grouped by every label
//! that identifies the two ends of a request, at the end of the window.

use crate::Matchers;
use anyhow::Result;
use futures::future;
use topology_core::{QueryMetrics, TimeWindow, Vector, UNKNOWN};
use tracing::debug;

/// The mesh's request counter.
pub const REQUESTS_TOTAL: &str = "istio_requests_total";

const NAMESPACE_GROUPING: &str = "source_workload_namespace,source_workload,source_app,\
    source_version,destination_service_namespace,destination_service_name,destination_workload,\
    destination_workload_namespace,destination_app,destination_version,request_protocol,\
    response_code,connection_security_policy,reporter";

const NODE_GROUPING: &str = "source_workload_namespace,source_workload,source_app,\
    source_version,destination_service_namespace,destination_service_name,destination_workload,\
    destination_app,destination_version,request_protocol,response_code";

/// Response codes of requests that reached the application.
const VALID_CODES: &str = "[2345][0-9][0-9]";

/// The queries that cover all traffic entering, leaving or inside `namespace`:
///
/// 1. requests from outside the mesh into the namespace;
/// 2. requests sent by workloads in the namespace;
/// 3. requests sent by workloads in other namespaces into the namespace;
/// 4. and 5. requests the destination reported under mutual TLS, from other namespaces and from
///    the namespace itself. Their rates are discarded when the graph is built but their TLS
///    posture is kept.
pub fn namespace_queries(namespace: &str, window: TimeWindow) -> Vec<String> {
    let range = window.duration_secs();
    let tls = |source_ns: Matchers| {
        source_ns
            .with_not("connection_security_policy", "none")
            .with_re("response_code", VALID_CODES)
    };

    vec![
        rate_by(
            &Matchers::new()
                .with("reporter", "destination")
                .with("source_workload", UNKNOWN)
                .with("destination_service_namespace", namespace),
            range,
            NAMESPACE_GROUPING,
        ),
        rate_by(
            &Matchers::new()
                .with("reporter", "source")
                .with("source_workload_namespace", namespace),
            range,
            NAMESPACE_GROUPING,
        ),
        rate_by(
            &Matchers::new()
                .with("reporter", "source")
                .with_not("source_workload_namespace", namespace)
                .with_not("source_workload", UNKNOWN)
                .with("destination_service_namespace", namespace),
            range,
            NAMESPACE_GROUPING,
        ),
        nonzero_rate_by(
            &tls(Matchers::new()
                .with("reporter", "destination")
                .with_not("source_workload_namespace", namespace)
                .with("destination_service_namespace", namespace)),
            range,
            NAMESPACE_GROUPING,
        ),
        nonzero_rate_by(
            &tls(Matchers::new()
                .with("reporter", "destination")
                .with("source_workload_namespace", namespace)),
            range,
            NAMESPACE_GROUPING,
        ),
    ]
}

/// The queries that cover traffic into a node and, for workloads, out of it. Service nodes are
/// matched on requests the mesh could not attribute to a destination workload.
pub fn node_queries(namespace: &str, workload: &str, service: &str, window: TimeWindow) -> Vec<String> {
    let range = window.duration_secs();
    if workload.is_empty() {
        return vec![rate_by(
            &Matchers::new()
                .with("reporter", "source")
                .with("destination_service_namespace", namespace)
                .with("destination_service_name", service)
                .with("destination_workload", UNKNOWN),
            range,
            NODE_GROUPING,
        )];
    }

    vec![
        rate_by(
            &Matchers::new()
                .with("reporter", "source")
                .with("destination_workload_namespace", namespace)
                .with("destination_workload", workload),
            range,
            NODE_GROUPING,
        ),
        rate_by(
            &Matchers::new()
                .with("reporter", "source")
                .with("source_workload_namespace", namespace)
                .with("source_workload", workload),
            range,
            NODE_GROUPING,
        ),
    ]
}

/// Fetches the traffic observed in `namespace` over `window`.
pub async fn namespace_traffic<M>(metrics: &M, namespace: &str, window: TimeWindow) -> Result<Vector>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let samples = query_all(metrics, namespace_queries(namespace, window), window).await?;
    debug!(%namespace, samples = samples.len(), "Fetched namespace traffic");
    Ok(samples)
}

/// Fetches the traffic into and out of one node over `window`.
pub async fn node_traffic<M>(
    metrics: &M,
    namespace: &str,
    workload: &str,
    service: &str,
    window: TimeWindow,
) -> Result<Vector>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let queries = node_queries(namespace, workload, service, window);
    let samples = query_all(metrics, queries, window).await?;
    debug!(%namespace, %workload, %service, samples = samples.len(), "Fetched node traffic");
    Ok(samples)
}

/// Evaluates the queries concurrently at the end of the window. Any failure fails the whole set.
async fn query_all<M>(metrics: &M, queries: Vec<String>, window: TimeWindow) -> Result<Vector>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let vectors =
        future::try_join_all(queries.iter().map(|q| metrics.query(q, window.end))).await?;
    Ok(vectors.into_iter().flatten().collect())
}

fn rate_by(matchers: &Matchers, range_secs: i64, grouping: &str) -> String {
    format!("sum(rate({REQUESTS_TOTAL}{matchers}[{range_secs}s])) by ({grouping})")
}

fn nonzero_rate_by(matchers: &Matchers, range_secs: i64, grouping: &str) -> String {
    format!("sum(rate({REQUESTS_TOTAL}{matchers}[{range_secs}s]) > 0) by ({grouping})")
}
