//! Builds a traffic graph from a vector of samples.

use crate::{
    identity::{is_valid_label, NodeId, NodeLabels, NodeType, UNKNOWN},
    sample::{ResponseClass, Sample, TrafficSample},
    workload::{Workload, Workloads},
    TimeWindow,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Workloads with this name prefix are mesh infrastructure and keep their name as their app.
const INFRASTRUCTURE_PREFIX: &str = "istio";

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Graph {
    pub namespace: String,
    pub start_time: i64,
    pub end_time: i64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(skip)]
    pub inject_service_nodes: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub namespace: String,
    pub service: String,
    pub node_type: NodeType,
    pub workload: String,
    pub version: String,
    pub is_root: bool,
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_istio_sidecar: Option<bool>,
    #[serde(rename = "has_TLS", skip_serializing_if = "Option::is_none")]
    pub has_tls: Option<bool>,
    /// Distinct services through which the node was observed.
    #[serde(skip)]
    pub services: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Edge {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub request_rate: f64,
    pub error_rate: f64,
}

/// Folds samples into a graph.
///
/// Nodes and edges are indexed by ID so that each sample is merged in constant time. The graph
/// is finalized by [`GraphBuilder::finish`].
#[derive(Debug)]
pub struct GraphBuilder<'w> {
    graph: Graph,
    workloads: &'w Workloads,
    nodes: HashMap<NodeId, usize>,
    edges: HashMap<(NodeId, NodeId), usize>,
}

/// The outcome of correlating one end of a sample with the inventory.
#[derive(Copy, Clone, Debug)]
enum Lookup<'w> {
    /// The node may not be drawn.
    Invalid,
    /// The node may be drawn, with its workload if it is deployed in the graph's namespace.
    Valid(Option<&'w Workload>),
}

/// Builds a graph from `samples`, starting from the nodes already in `graph`.
pub fn build_graph(graph: Graph, samples: &[Sample], workloads: &Workloads) -> Graph {
    let mut builder = GraphBuilder::new(graph, workloads);
    builder.add_samples(samples);
    builder.finish()
}

// === impl Graph ===

impl Graph {
    pub fn new(
        namespace: impl Into<String>,
        window: TimeWindow,
        inject_service_nodes: bool,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            start_time: window.start,
            end_time: window.end,
            nodes: Vec::new(),
            edges: Vec::new(),
            inject_service_nodes,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, source: NodeId, target: NodeId) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source_id == source && e.target_id == target)
    }
}

// === impl Node ===

impl Node {
    fn new(id: NodeId, node_type: NodeType, labels: NodeLabels<'_>) -> Self {
        Self {
            id,
            namespace: labels.namespace.to_string(),
            service: labels.service.to_string(),
            node_type,
            workload: labels.workload.to_string(),
            version: labels.version.to_string(),
            is_root: false,
            app: labels.app.to_string(),
            has_istio_sidecar: None,
            has_tls: None,
            services: BTreeSet::new(),
        }
    }

    /// Names nodes whose app could not be determined after their workload.
    fn resolve_unknown_app(&mut self) {
        if !is_valid_label(&self.app) && is_valid_label(&self.workload) {
            self.app = if self.workload.starts_with(INFRASTRUCTURE_PREFIX) {
                self.workload.clone()
            } else {
                format!("unknown(wl_{})", self.workload)
            };
        }
        if self.version == UNKNOWN {
            self.version.clear();
        }
    }

    /// Workload nodes display every service they were reached through.
    fn flatten_services(&mut self) {
        if self.node_type == NodeType::Workload {
            self.service = self
                .services
                .iter()
                .filter(|s| !s.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(",");
        }
    }
}

// === impl GraphBuilder ===

impl<'w> GraphBuilder<'w> {
    pub fn new(graph: Graph, workloads: &'w Workloads) -> Self {
        let nodes = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
        let edges = graph
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.source_id, e.target_id), i))
            .collect();
        Self {
            graph,
            workloads,
            nodes,
            edges,
        }
    }

    /// Seeds the graph with a node of interest, whether or not any traffic involves it.
    ///
    /// Returns `None` if no ID can be generated from the labels.
    pub fn add_anchor(&mut self, labels: NodeLabels<'_>) -> Option<NodeId> {
        let (id, node_type) = labels.generate_id();
        if node_type == NodeType::Unknown {
            debug!(?labels, "Cannot anchor a graph on an unidentifiable node");
            return None;
        }
        let workload = match node_type {
            NodeType::Workload => self.workloads.find(labels.workload),
            _ => None,
        };
        self.add_node(id, node_type, labels, workload, false);
        Some(id)
    }

    pub fn add_samples<'s>(&mut self, samples: impl IntoIterator<Item = &'s Sample>) {
        for sample in samples {
            self.add_sample(sample);
        }
    }

    /// Folds a single sample into the graph. Malformed or unidentifiable samples are skipped.
    pub fn add_sample(&mut self, sample: &Sample) {
        let traffic = match TrafficSample::classify(sample) {
            Ok(traffic) => traffic,
            Err(missing) => {
                debug!(%missing, metric = ?sample.metric, "Skipping sample without expected labels");
                return;
            }
        };
        let TrafficSample {
            source,
            destination,
            response_code,
            value,
            has_tls,
        } = traffic;

        let (_, source_type) = source.generate_id();
        if source_type == NodeType::Unknown {
            return;
        }
        let (_, destination_type) = destination.generate_id();
        if destination_type == NodeType::Unknown {
            return;
        }

        // Traffic between two other namespaces is not part of this graph.
        let ns = self.graph.namespace.as_str();
        if source.namespace != ns && destination.namespace != ns {
            trace!(
                source = %source.namespace,
                destination = %destination.namespace,
                "Skipping foreign traffic"
            );
            return;
        }

        if self.graph.inject_service_nodes && destination_type == NodeType::Workload {
            let service = NodeLabels {
                namespace: destination.namespace,
                service: destination.service,
                ..NodeLabels::default()
            };
            self.add_traffic(source, service, response_code, value, has_tls);
            self.add_traffic(service, destination, response_code, value, false);
        } else {
            self.add_traffic(source, destination, response_code, value, has_tls);
        }
    }

    fn add_traffic(
        &mut self,
        source: NodeLabels<'_>,
        destination: NodeLabels<'_>,
        response_code: &str,
        value: f64,
        has_tls: bool,
    ) {
        let (source_id, source_type) = source.generate_id();
        if source_type == NodeType::Unknown {
            return;
        }
        let (target_id, target_type) = destination.generate_id();
        if target_type == NodeType::Unknown {
            return;
        }

        // A service that received no traffic is left over from a pod lifecycle change.
        if !self.graph.inject_service_nodes && target_type == NodeType::Service && value == 0.0 {
            trace!(service = %destination.service, "Skipping idle service");
            return;
        }

        let source_lookup = self.find_workload(source, source_type);
        let target_lookup = self.find_workload(destination, target_type);
        let ns = self.graph.namespace.as_str();

        // An end outside the namespace is only drawn if the other end is valid.
        let add_source = match (source_lookup, target_lookup) {
            (Lookup::Valid(wl), Lookup::Valid(_)) => Some(wl),
            (Lookup::Valid(wl), Lookup::Invalid) if source.namespace == ns => Some(wl),
            _ => None,
        };
        let add_target = match (target_lookup, source_lookup) {
            (Lookup::Valid(wl), Lookup::Valid(_)) => Some(wl),
            (Lookup::Valid(wl), Lookup::Invalid) if destination.namespace == ns => Some(wl),
            _ => None,
        };

        if let Some(workload) = add_source {
            self.add_node(source_id, source_type, source, workload, false);
        }
        if let Some(workload) = add_target {
            self.add_node(target_id, target_type, destination, workload, has_tls);
        }
        if add_source.is_some() && add_target.is_some() {
            self.add_edge(source_id, target_id, response_code, value);
        }
    }

    /// Service nodes are always valid. Workloads in the graph's namespace are valid only if they
    /// are deployed; workloads in other namespaces cannot be checked and are assumed valid.
    fn find_workload(&self, labels: NodeLabels<'_>, node_type: NodeType) -> Lookup<'w> {
        if node_type == NodeType::Service {
            return Lookup::Valid(None);
        }
        if labels.namespace != self.graph.namespace || !is_valid_label(labels.workload) {
            return Lookup::Valid(None);
        }
        match self.workloads.find(labels.workload) {
            Some(workload) => Lookup::Valid(Some(workload)),
            None => {
                trace!(workload = %labels.workload, "Workload is not deployed");
                Lookup::Invalid
            }
        }
    }

    fn add_node<'a>(
        &mut self,
        id: NodeId,
        node_type: NodeType,
        mut labels: NodeLabels<'a>,
        workload: Option<&'a Workload>,
        has_tls: bool,
    ) {
        let mut has_sidecar = false;
        if node_type == NodeType::Workload {
            if let Some(workload) = workload {
                // The inventory is authoritative for deployed workloads.
                labels.app = workload.app();
                labels.version = workload.version();
                has_sidecar = workload.has_sidecar();
            }
        }

        let inject = self.graph.inject_service_nodes;
        let nodes = &mut self.graph.nodes;
        let node = match self.nodes.get(&id) {
            Some(&i) => {
                let node = &mut nodes[i];
                merge_label(&mut node.app, labels.app);
                merge_label(&mut node.version, labels.version);
                if node_type == NodeType::Service {
                    if inject && labels.workload != UNKNOWN {
                        node.workload = labels.workload.to_string();
                    } else {
                        merge_label(&mut node.workload, labels.workload);
                    }
                }
                node
            }
            None => {
                self.nodes.insert(id, nodes.len());
                nodes.push(Node::new(id, node_type, labels));
                let i = nodes.len() - 1;
                &mut nodes[i]
            }
        };

        if !labels.service.is_empty() {
            node.services.insert(labels.service.to_string());
        }
        // Once a service is seen over mutual TLS it stays marked.
        if node_type == NodeType::Service && (node.has_tls.is_none() || has_tls) {
            node.has_tls = Some(has_tls);
        }
        if node_type == NodeType::Workload {
            node.has_istio_sidecar = Some(has_sidecar);
        }
    }

    fn add_edge(&mut self, source_id: NodeId, target_id: NodeId, response_code: &str, value: f64) {
        let error = if ResponseClass::from_code(response_code).is_error() {
            value
        } else {
            0.0
        };

        let edges = &mut self.graph.edges;
        match self.edges.get(&(source_id, target_id)) {
            Some(&i) => {
                let edge = &mut edges[i];
                edge.request_rate += value;
                edge.error_rate += error;
            }
            None => {
                self.edges.insert((source_id, target_id), edges.len());
                edges.push(Edge {
                    source_id,
                    target_id,
                    request_rate: value,
                    error_rate: error,
                });
            }
        }
    }

    /// Resolves display labels, marks roots, and orders nodes (roots first, then by ID) and edges
    /// (by source then target).
    pub fn finish(self) -> Graph {
        let mut graph = self.graph;

        let sources = graph.edges.iter().map(|e| e.source_id).collect::<HashSet<_>>();
        let targets = graph
            .edges
            .iter()
            .filter(|e| e.source_id != e.target_id)
            .map(|e| e.target_id)
            .collect::<HashSet<_>>();

        for node in &mut graph.nodes {
            node.resolve_unknown_app();
            node.flatten_services();
            node.is_root = sources.contains(&node.id) && !targets.contains(&node.id);
        }

        graph
            .nodes
            .sort_by(|a, b| b.is_root.cmp(&a.is_root).then(a.id.cmp(&b.id)));
        graph.edges.sort_by_key(|e| (e.source_id, e.target_id));
        graph
    }
}

/// Replaces a label only with a more informative value: a set value over an empty one and a
/// valid value over the mesh's `unknown` placeholder.
fn merge_label(current: &mut String, incoming: &str) {
    let rank = |v: &str| match v {
        "" => 0,
        UNKNOWN => 1,
        _ => 2,
    };
    if rank(incoming) > rank(current) {
        *current = incoming.to_string();
    }
}
