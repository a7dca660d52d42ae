//! The deployed-workload inventory that traffic is correlated against.

use crate::identity::UNKNOWN;
use serde::{Serialize, Serializer};
use topology_k8s_api::Labels;
use tracing::info;

/// The pod label naming the application.
pub const APP_LABEL: &str = "app";

/// The pod label naming the application version.
pub const VERSION_LABEL: &str = "version";

/// The kind of controller that manages a workload's pods.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControllerKind {
    Deployment,
    DeploymentConfig,
    ReplicaSet,
    ReplicationController,
    StatefulSet,
    Job,
    CronJob,
    DaemonSet,
    Pod,
    Other(String),
}

/// A canonical deployable unit: one controller and the pods it manages.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ControllerKind,
    pub created_at: String,
    pub resource_version: String,
    pub istio_sidecar: bool,
    pub labels: Labels,
    pub app_label: bool,
    pub version_label: bool,
    pub pod_count: usize,
    pub replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
}

/// Workloads sorted by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Workloads(Vec<Workload>);

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    pub labels: Labels,
    pub created_at: String,
    pub created_by: Vec<Reference>,
    pub istio_containers: Vec<ContainerInfo>,
    pub istio_init_containers: Vec<ContainerInfo>,
    pub status: String,
    pub app_label: bool,
    pub version_label: bool,
    pub app: String,
    pub version: String,
}

/// Identifies the owner of a pod.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub name: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub created_at: String,
    pub resource_version: String,
    pub namespace: String,
    pub labels: Labels,
    #[serde(rename = "type")]
    pub service_type: String,
    pub ip: String,
    pub ports: Vec<Port>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Port {
    pub name: String,
    pub protocol: String,
    pub port: i32,
}

// === impl ControllerKind ===

impl ControllerKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Deployment" => Self::Deployment,
            "DeploymentConfig" => Self::DeploymentConfig,
            "ReplicaSet" => Self::ReplicaSet,
            "ReplicationController" => Self::ReplicationController,
            "StatefulSet" => Self::StatefulSet,
            "Job" => Self::Job,
            "CronJob" => Self::CronJob,
            "DaemonSet" => Self::DaemonSet,
            "Pod" => Self::Pod,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::DeploymentConfig => "DeploymentConfig",
            Self::ReplicaSet => "ReplicaSet",
            Self::ReplicationController => "ReplicationController",
            Self::StatefulSet => "StatefulSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::DaemonSet => "DaemonSet",
            Self::Pod => "Pod",
            Self::Other(kind) => kind,
        }
    }

    /// The precedence used when a controller name is claimed by more than one kind. Kinds that
    /// pods never name directly as their controller have no priority.
    pub fn priority(&self) -> Option<i8> {
        match self {
            Self::Deployment => Some(6),
            Self::DeploymentConfig => Some(5),
            Self::ReplicaSet => Some(4),
            Self::ReplicationController => Some(3),
            Self::StatefulSet => Some(2),
            Self::Job => Some(1),
            Self::DaemonSet => Some(0),
            Self::Pod => Some(-1),
            Self::CronJob | Self::Other(_) => None,
        }
    }

    /// Picks the kind to keep for a controller name. Ties keep `self`.
    pub fn preferred(self, other: Self) -> Self {
        let weight = |kind: &Self| {
            kind.priority().unwrap_or_else(|| {
                info!(kind = %kind, "Controller is assigned to a pod but is not managed");
                0
            })
        };
        if weight(&self) >= weight(&other) {
            self
        } else {
            other
        }
    }
}

impl Default for ControllerKind {
    fn default() -> Self {
        Self::Pod
    }
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ControllerKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// === impl Workload ===

impl Workload {
    pub fn new(name: impl Into<String>, kind: ControllerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Sets the workload's labels and whether they carry the `app`/`version` labels.
    pub fn set_labels(&mut self, labels: Labels) {
        self.app_label = labels.contains_key(APP_LABEL);
        self.version_label = labels.contains_key(VERSION_LABEL);
        self.labels = labels;
    }

    pub fn set_pods(&mut self, pods: Vec<Pod>) {
        self.pod_count = pods.len();
        self.istio_sidecar = pods.iter().any(Pod::has_sidecar);
        self.pods = pods;
    }

    /// Sets desired and available replicas; unavailable replicas are the difference.
    pub fn set_replicas(&mut self, replicas: i32, available: i32) {
        self.replicas = replicas;
        self.available_replicas = available;
        self.unavailable_replicas = replicas - available;
    }

    /// For controllers whose status is not fetched, infers replicas as the pods that have not
    /// succeeded and available replicas as the running pods.
    pub fn infer_replicas_from_pods(&mut self) {
        let replicas = self.pods.iter().filter(|p| !p.has_succeeded()).count() as i32;
        let available = self.pods.iter().filter(|p| p.is_running()).count() as i32;
        self.replicas = replicas;
        self.available_replicas = available;
        // Completed pods are not unhealthy.
        self.unavailable_replicas = (replicas - available).max(0);
    }

    /// The `app` label of the first pod that has a non-empty one.
    pub fn app(&self) -> &str {
        self.pods
            .iter()
            .find(|p| p.app_label && !p.app.is_empty())
            .map_or("", |p| p.app.as_str())
    }

    /// The `version` label of the first pod that has a non-empty one.
    pub fn version(&self) -> &str {
        self.pods
            .iter()
            .find(|p| p.version_label && !p.version.is_empty())
            .map_or("", |p| p.version.as_str())
    }

    pub fn has_sidecar(&self) -> bool {
        self.pods.iter().any(Pod::has_sidecar)
    }
}

// === impl Workloads ===

impl Workloads {
    /// Finds a workload by name. The empty name and the mesh's `unknown` placeholder never match.
    pub fn find(&self, name: &str) -> Option<&Workload> {
        if name.is_empty() || name == UNKNOWN {
            return None;
        }
        self.0
            .binary_search_by(|w| w.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.0[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Workload> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Workload> {
        self.0
    }
}

impl From<Vec<Workload>> for Workloads {
    fn from(mut workloads: Vec<Workload>) -> Self {
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Self(workloads)
    }
}

impl FromIterator<Workload> for Workloads {
    fn from_iter<T: IntoIterator<Item = Workload>>(iter: T) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl<'a> IntoIterator for &'a Workloads {
    type Item = &'a Workload;
    type IntoIter = std::slice::Iter<'a, Workload>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// === impl Pod ===

impl Pod {
    pub const RUNNING: &'static str = "Running";
    pub const SUCCEEDED: &'static str = "Succeeded";

    /// Sets the pod's labels and derives its `app`/`version` fields from them.
    pub fn set_labels(&mut self, labels: Labels) {
        let app = labels.get(APP_LABEL);
        let version = labels.get(VERSION_LABEL);
        self.app_label = app.is_some();
        self.version_label = version.is_some();
        self.app = app.unwrap_or_default().to_string();
        self.version = version.unwrap_or_default().to_string();
        self.labels = labels;
    }

    /// True iff the mesh injected at least one container into the pod.
    pub fn has_sidecar(&self) -> bool {
        !self.istio_containers.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.status == Self::RUNNING
    }

    pub fn has_succeeded(&self) -> bool {
        self.status == Self::SUCCEEDED
    }
}
