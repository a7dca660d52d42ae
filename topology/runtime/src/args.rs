use crate::{GraphRequest, NodeGraphRequest, NodeRef, TopologyService};
use anyhow::{ensure, Result};
use clap::Parser;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use topology_core::{DiscoverWorkloads, QueryMetrics, QueryRange, TimeWindow};
use topology_k8s_api::Selector;
use topology_k8s_inventory::Inventory;
use topology_metrics::{ClientCache, EdgeQuery};
use tracing::debug;

/// Traffic is observed over the last ten minutes unless a start is given.
const DEFAULT_WINDOW_SECS: i64 = 600;

#[derive(Debug, Parser)]
#[clap(name = "topology", about = "Builds service topology graphs from mesh traffic")]
pub struct Args {
    #[clap(long, default_value = "topology=info,warn", env = "TOPOLOGY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Base URL of the Prometheus API that mesh metrics are read from.
    #[clap(
        long,
        default_value = "http://prometheus.istio-system:9090",
        env = "PROMETHEUS_URL"
    )]
    prometheus_url: String,

    /// Timeout of each metrics query, in seconds.
    #[clap(long, default_value = "30")]
    prometheus_timeout: u64,

    /// Draws the service through which a workload is reached as a node of its own.
    #[clap(long)]
    inject_service_nodes: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Prints the graph of all traffic involving a namespace.
    Graph {
        #[clap(flatten)]
        window: WindowArgs,
    },

    /// Prints the graph of traffic into and out of one workload or service.
    NodeGraph {
        #[clap(flatten)]
        window: WindowArgs,

        /// Namespace of the node, if it differs from the graph's.
        #[clap(long)]
        node_namespace: Option<String>,

        #[clap(long, default_value = "")]
        workload: String,

        #[clap(long, default_value = "")]
        service: String,

        #[clap(long, default_value = "")]
        app: String,

        #[clap(long, default_value = "")]
        version: String,
    },

    /// Prints the workloads deployed in a namespace.
    Workloads {
        #[clap(long, short = 'n')]
        namespace: String,

        /// Only lists workloads whose labels match this selector.
        #[clap(long, short = 'l')]
        selector: Option<Selector>,
    },

    /// Prints request counts, rates and latencies of a workload.
    WorkloadMetrics {
        #[clap(flatten)]
        range: RangeArgs,

        #[clap(long)]
        workload: String,
    },

    /// Prints request counts, rates and latencies of a service.
    ServiceMetrics {
        #[clap(flatten)]
        range: RangeArgs,

        #[clap(long)]
        service: String,

        /// Only counts requests served by this workload.
        #[clap(long)]
        workload: Option<String>,
    },

    /// Prints request counts, rates and latencies along one edge.
    EdgeMetrics {
        #[clap(flatten)]
        range: RangeArgs,

        /// Defaults to `--namespace`.
        #[clap(long)]
        source_namespace: Option<String>,

        /// Defaults to `--namespace`.
        #[clap(long)]
        target_namespace: Option<String>,

        #[clap(long, default_value = "")]
        source_workload: String,

        #[clap(long, default_value = "")]
        source_service: String,

        #[clap(long, default_value = "")]
        target_workload: String,

        #[clap(long, default_value = "")]
        target_service: String,
    },
}

#[derive(Debug, clap::Args)]
struct WindowArgs {
    #[clap(long, short = 'n')]
    namespace: String,

    /// Start of the observed window, in unix seconds. Defaults to ten minutes before the end.
    #[clap(long)]
    start: Option<i64>,

    /// End of the observed window, in unix seconds. Defaults to now.
    #[clap(long)]
    end: Option<i64>,

    /// Reads metrics from this Prometheus instead of the default one.
    #[clap(long)]
    metrics_url: Option<String>,
}

#[derive(Debug, clap::Args)]
struct RangeArgs {
    #[clap(flatten)]
    window: WindowArgs,

    /// Resolution of rate and latency series, in seconds.
    #[clap(long, default_value = "60")]
    step: i64,
}

// === impl Args ===

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            prometheus_url,
            prometheus_timeout,
            inject_service_nodes,
            command,
        } = self;

        log_format
            .try_init(log_level)
            .expect("must configure logging");

        let client = client.try_client().await?;
        let metrics =
            ClientCache::prometheus(prometheus_url, Duration::from_secs(prometheus_timeout));
        debug!(url = %metrics.default_url(), "Using metrics backend");
        let service = TopologyService::new(Inventory::new(client), metrics);

        command.run(&service, inject_service_nodes).await
    }
}

// === impl Command ===

impl Command {
    async fn run<W, M>(self, service: &TopologyService<W, M>, inject_service_nodes: bool) -> Result<()>
    where
        W: DiscoverWorkloads + Send + Sync,
        M: QueryMetrics + Send + Sync,
    {
        match self {
            Self::Graph { window } => {
                let req = GraphRequest {
                    window: window.time_window()?,
                    namespace: window.namespace,
                    metrics_url: window.metrics_url,
                    inject_service_nodes,
                };
                print(&service.namespace_graph(&req).await?)
            }

            Self::NodeGraph {
                window,
                node_namespace,
                workload,
                service: svc,
                app,
                version,
            } => {
                let req = NodeGraphRequest {
                    window: window.time_window()?,
                    namespace: window.namespace,
                    node: NodeRef {
                        namespace: node_namespace.unwrap_or_default(),
                        workload,
                        service: svc,
                        app,
                        version,
                    },
                    metrics_url: window.metrics_url,
                    inject_service_nodes,
                };
                print(&service.node_graph(&req).await?)
            }

            Self::Workloads {
                namespace,
                selector,
            } => print(&service.workloads(&namespace, selector.as_ref()).await?),

            Self::WorkloadMetrics { range, workload } => {
                let query_range = range.query_range()?;
                let WindowArgs {
                    namespace,
                    metrics_url,
                    ..
                } = range.window;
                let summary = service
                    .workload_metrics(&namespace, &workload, query_range, metrics_url.as_deref())
                    .await?;
                print(&summary)
            }

            Self::ServiceMetrics {
                range,
                service: svc,
                workload,
            } => {
                let query_range = range.query_range()?;
                let WindowArgs {
                    namespace,
                    metrics_url,
                    ..
                } = range.window;
                let summary = service
                    .service_metrics(
                        &namespace,
                        &svc,
                        workload.as_deref(),
                        query_range,
                        metrics_url.as_deref(),
                    )
                    .await?;
                print(&summary)
            }

            Self::EdgeMetrics {
                range,
                source_namespace,
                target_namespace,
                source_workload,
                source_service,
                target_workload,
                target_service,
            } => {
                let QueryRange { start, end, step } = range.query_range()?;
                let WindowArgs {
                    namespace,
                    metrics_url,
                    ..
                } = range.window;
                let edge = EdgeQuery {
                    source_namespace: source_namespace.unwrap_or_else(|| namespace.clone()),
                    target_namespace: target_namespace.unwrap_or(namespace),
                    source_workload,
                    source_service,
                    target_workload,
                    target_service,
                    start_time: start,
                    end_time: end,
                    step,
                };
                print(&service.edge_metrics(&edge, metrics_url.as_deref()).await?)
            }
        }
    }
}

// === impl WindowArgs ===

impl WindowArgs {
    fn time_window(&self) -> Result<TimeWindow> {
        let end = match self.end {
            Some(end) => end,
            None => now()?,
        };
        let start = self.start.unwrap_or(end - DEFAULT_WINDOW_SECS);
        ensure!(start < end, "the window must start before it ends");
        Ok(TimeWindow::new(start, end))
    }
}

// === impl RangeArgs ===

impl RangeArgs {
    fn query_range(&self) -> Result<QueryRange> {
        ensure!(self.step > 0, "the step must be positive");
        let TimeWindow { start, end } = self.window.time_window()?;
        Ok(QueryRange {
            start,
            end,
            step: self.step,
        })
    }
}

fn now() -> Result<i64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(elapsed.as_secs() as i64)
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
