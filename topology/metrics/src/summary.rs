//! Request counts, rates and latencies of a single workload, service or edge.

use crate::{histogram, traffic::REQUESTS_TOTAL, Matchers};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use topology_core::{NodeType, QueryMetrics, QueryRange, RequestCount, SamplePair};
use tracing::{instrument, warn};

type Series = Vec<SamplePair>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkloadMetrics {
    pub start_time: i64,
    pub end_time: i64,
    pub step: i64,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub namespace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    pub workload: String,
    pub request_count_in: RequestCount,
    pub request_count_out: RequestCount,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_rate_in: Series,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_rate_out: Series,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_rate_in: Series,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_rate_out: Series,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub request_response_time: BTreeMap<String, Series>,
}

/// Inbound metrics of a service. Services have no outbound traffic of their own.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub start_time: i64,
    pub end_time: i64,
    pub step: i64,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    /// Workloads observed behind the service.
    pub workloads: Vec<String>,
    pub request_count: RequestCount,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_rate: Series,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_rate: Series,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub request_response_time: BTreeMap<String, Series>,
}

/// Identifies an edge by its two ends. Unset fields do not constrain the edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EdgeQuery {
    pub source_namespace: String,
    pub target_namespace: String,
    pub source_workload: String,
    pub source_service: String,
    pub target_workload: String,
    pub target_service: String,
    pub start_time: i64,
    pub end_time: i64,
    pub step: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EdgeMetrics {
    pub query_options: EdgeQuery,
    pub request_count: RequestCount,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_rate: Series,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_rate: Series,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub request_response_time: BTreeMap<String, Series>,
}

#[instrument(skip(metrics))]
pub async fn workload_metrics<M>(
    metrics: &M,
    namespace: &str,
    workload: &str,
    range: QueryRange,
) -> Result<WorkloadMetrics>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let inbound = Matchers::new()
        .with("reporter", "source")
        .with("destination_workload_namespace", namespace)
        .with("destination_workload", workload);
    let outbound = Matchers::new()
        .with("reporter", "source")
        .with("source_workload_namespace", namespace)
        .with("source_workload", workload);
    let (inbound_errors, outbound_errors) = (inbound.errors(), outbound.errors());

    let counts = async {
        futures::try_join!(
            request_count(metrics, &inbound, range),
            request_count(metrics, &outbound, range),
            rate(metrics, &inbound, range),
            rate(metrics, &outbound, range),
            rate(metrics, &inbound_errors, range),
            rate(metrics, &outbound_errors, range),
        )
    };
    let (counts, services, latency) = futures::join!(
        counts,
        observed(metrics, &inbound, "destination_service_name", range),
        histogram::latency(metrics, &inbound, "", range),
    );
    let (request_count_in, request_count_out, rate_in, rate_out, errors_in, errors_out) = counts?;

    Ok(WorkloadMetrics {
        start_time: range.start,
        end_time: range.end,
        step: range.step,
        node_type: NodeType::Workload,
        namespace: namespace.to_string(),
        services,
        workload: workload.to_string(),
        request_count_in,
        request_count_out,
        request_rate_in: rate_in,
        request_rate_out: rate_out,
        error_rate_in: errors_in,
        error_rate_out: errors_out,
        request_response_time: histogram::response_times(&latency, None),
    })
}

/// Summarizes requests to a service, optionally only those served by `workload`.
#[instrument(skip(metrics))]
pub async fn service_metrics<M>(
    metrics: &M,
    namespace: &str,
    service: &str,
    workload: Option<&str>,
    range: QueryRange,
) -> Result<ServiceMetrics>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let inbound = Matchers::new()
        .with("reporter", "source")
        .with("destination_service_namespace", namespace)
        .with("destination_service_name", service);
    let served = inbound
        .clone()
        .with_if_set("destination_workload", workload.unwrap_or_default());
    let served_errors = served.errors();

    let counts = async {
        futures::try_join!(
            request_count(metrics, &served, range),
            rate(metrics, &served, range),
            rate(metrics, &served_errors, range),
        )
    };
    let (counts, workloads, latency) = futures::join!(
        counts,
        observed(metrics, &inbound, "destination_workload", range),
        histogram::latency(metrics, &inbound, "", range),
    );
    let (request_count, request_rate, error_rate) = counts?;

    Ok(ServiceMetrics {
        start_time: range.start,
        end_time: range.end,
        step: range.step,
        node_type: NodeType::Service,
        namespace: namespace.to_string(),
        service: service.to_string(),
        workloads,
        request_count,
        request_rate,
        error_rate,
        request_response_time: histogram::response_times(&latency, None),
    })
}

#[instrument(skip_all, fields(source = %edge.source_workload, target = %edge.target_workload))]
pub async fn edge_metrics<M>(metrics: &M, edge: &EdgeQuery) -> Result<EdgeMetrics>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let range = edge.range();
    let requests = edge.matchers();
    let errors = requests.errors();
    let to_target = edge.latency_matchers();

    let counts = async {
        futures::try_join!(
            request_count(metrics, &requests, range),
            rate(metrics, &requests, range),
            rate(metrics, &errors, range),
        )
    };
    let (counts, latency) = futures::join!(
        counts,
        histogram::latency(metrics, &to_target, "source_workload", range),
    );
    let (request_count, request_rate, error_rate) = counts?;

    Ok(EdgeMetrics {
        query_options: edge.clone(),
        request_count,
        request_rate,
        error_rate,
        request_response_time: histogram::response_times(
            &latency,
            Some(edge.source_workload.as_str()),
        ),
    })
}

// === impl EdgeQuery ===

impl EdgeQuery {
    pub fn range(&self) -> QueryRange {
        QueryRange {
            start: self.start_time,
            end: self.end_time,
            step: self.step,
        }
    }

    /// Source-reported requests along the edge. A target service takes precedence over the
    /// target namespace's workloads.
    fn matchers(&self) -> Matchers {
        let m = Matchers::new()
            .with("reporter", "source")
            .with_if_set("source_workload", &self.source_workload)
            .with_if_set("source_workload_namespace", &self.source_namespace);
        let m = if !self.target_service.is_empty() {
            m.with("destination_service_name", &self.target_service)
                .with_if_set("destination_service_namespace", &self.target_namespace)
        } else {
            m.with_if_set("destination_workload_namespace", &self.target_namespace)
        };
        m.with_if_set("destination_workload", &self.target_workload)
    }

    /// Latency into the target, grouped by source workload. Requests leaving a service are only
    /// reported by their destination.
    fn latency_matchers(&self) -> Matchers {
        let reporter = if self.source_service.is_empty() {
            "source"
        } else {
            "destination"
        };
        let m = Matchers::new().with("reporter", reporter);
        if self.target_workload.is_empty() {
            m.with_if_set("destination_service_name", &self.target_service)
                .with_if_set("destination_service_namespace", &self.target_namespace)
        } else {
            m.with_if_set("destination_workload_namespace", &self.target_namespace)
                .with("destination_workload", &self.target_workload)
        }
    }
}

/// Counts requests over the range by response class.
async fn request_count<M>(metrics: &M, matchers: &Matchers, range: QueryRange) -> Result<RequestCount>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let duration = range.end - range.start;
    let query = format!("sum(delta({REQUESTS_TOTAL}{matchers}[{duration}s])) by (response_code)");
    let vector = metrics.query(&query, range.end).await?;
    Ok(RequestCount::from_vector(&vector))
}

/// The request rate series, sampled every step. Only the first series is reported.
async fn rate<M>(metrics: &M, matchers: &Matchers, range: QueryRange) -> Result<Series>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let step = range.step;
    let query = format!("sum(rate({REQUESTS_TOTAL}{matchers}[{step}s]))");
    let matrix = metrics.query_range(&query, range).await?;
    Ok(matrix
        .into_iter()
        .next()
        .map(|stream| stream.values)
        .unwrap_or_default())
}

/// The distinct values of `label` among requests over the range. Failures yield no values.
async fn observed<M>(metrics: &M, matchers: &Matchers, label: &str, range: QueryRange) -> Vec<String>
where
    M: QueryMetrics + Sync + ?Sized,
{
    let duration = range.end - range.start;
    let query = format!("sum(delta({REQUESTS_TOTAL}{matchers}[{duration}s])) by ({label})");
    match metrics.query(&query, range.end).await {
        Ok(vector) => vector
            .iter()
            .filter_map(|s| s.label(label))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        Err(error) => {
            warn!(%label, %error, "Failed to fetch observed label values");
            Vec::new()
        }
    }
}
