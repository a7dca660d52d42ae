//! Request latency series.

use crate::Matchers;
use futures::future;
use std::collections::BTreeMap;
use topology_core::{Matrix, QueryMetrics, QueryRange, SamplePair};
use tracing::warn;

/// The mesh's request duration histogram.
pub const REQUEST_DURATION: &str = "istio_request_duration_seconds";

/// The key of the average latency series.
pub const AVERAGE: &str = "avg";

/// The quantiles reported alongside the average.
pub const QUANTILES: [&str; 3] = ["0.5", "0.95", "0.99"];

/// Latency values below this are reported unrounded.
const PRECISION: &str = "0.001";

/// Fetches the average and quantile latency series concurrently, keyed by [`AVERAGE`] and by
/// quantile. A series that cannot be fetched is reported empty.
pub async fn latency<M>(
    metrics: &M,
    matchers: &Matchers,
    grouping: &str,
    range: QueryRange,
) -> BTreeMap<String, Matrix>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let series = std::iter::once((AVERAGE, average_query(matchers, grouping, range.step))).chain(
        QUANTILES
            .iter()
            .map(|&q| (q, quantile_query(q, matchers, grouping, range.step))),
    );

    let fetched = future::join_all(series.map(|(key, query)| async move {
        let matrix = metrics
            .query_range(&query, range)
            .await
            .unwrap_or_else(|error| {
                warn!(series = %key, %error, "Failed to fetch latency");
                Matrix::new()
            });
        (key.to_string(), matrix)
    }))
    .await;

    fetched.into_iter().collect()
}

/// Flattens latency series to one value series per key.
///
/// When `source_workload` is set, series labeled with a different source workload are ignored.
/// If several series remain for a key, the last one is reported.
pub fn response_times(
    histograms: &BTreeMap<String, Matrix>,
    source_workload: Option<&str>,
) -> BTreeMap<String, Vec<SamplePair>> {
    let source_workload = source_workload.filter(|wl| !wl.is_empty());
    let mut times = BTreeMap::new();
    for (key, matrix) in histograms {
        for stream in matrix {
            let selected = match (source_workload, stream.metric.get("source_workload")) {
                (Some(wanted), Some(source)) => wanted == source,
                _ => true,
            };
            if selected {
                times.insert(key.clone(), stream.values.clone());
            }
        }
    }
    times
}

fn average_query(matchers: &Matchers, grouping: &str, step: i64) -> String {
    let by = if grouping.is_empty() {
        String::new()
    } else {
        format!(" by ({grouping})")
    };
    round_significant(&format!(
        "sum(rate({REQUEST_DURATION}_sum{matchers}[{step}s])){by} / \
         sum(rate({REQUEST_DURATION}_count{matchers}[{step}s])){by}"
    ))
}

fn quantile_query(quantile: &str, matchers: &Matchers, grouping: &str, step: i64) -> String {
    let by = if grouping.is_empty() {
        String::new()
    } else {
        format!(",{grouping}")
    };
    round_significant(&format!(
        "histogram_quantile({quantile}, sum(rate({REQUEST_DURATION}_bucket{matchers}[{step}s])) by (le{by}))"
    ))
}

/// Rounds values only when rounding leaves them significant.
fn round_significant(query: &str) -> String {
    format!("round({query}, {PRECISION}) > {PRECISION} or {query}")
}
