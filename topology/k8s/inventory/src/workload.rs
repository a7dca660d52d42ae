use crate::{
    platform::{Arena, Snapshot},
    pod,
    resolve::template_labels,
    service,
};
use topology_core::{ControllerKind, Labels, Pod, Workload};
use topology_k8s_api::{self as k8s, labels::Map, ResourceExt, Selector};

/// Builds the workload for a controller, or `None` if it is not in the snapshot.
pub(crate) type BuildFn = fn(&Snapshot, &str, &ControllerKind) -> Option<Workload>;

/// A controller object whose status is read directly.
trait Controller: k8s::Resource + Sized {
    fn arena(snapshot: &Snapshot) -> &Arena<Self>;

    /// The labels that select the controller's pods.
    fn selector_labels(&self) -> Option<&Map>;

    /// The labels reported for the workload.
    fn workload_labels(&self) -> Option<&Map> {
        self.selector_labels()
    }

    fn set_replicas(&self, workload: &mut Workload);
}

/// Dispatches on the controller kind. Kinds that are not fetched are built from the pods that
/// name them as their controller.
pub(crate) fn builder(kind: &ControllerKind) -> BuildFn {
    match kind {
        ControllerKind::Deployment => build::<k8s::Deployment>,
        ControllerKind::ReplicaSet => build::<k8s::ReplicaSet>,
        ControllerKind::ReplicationController => build::<k8s::ReplicationController>,
        ControllerKind::StatefulSet => build::<k8s::StatefulSet>,
        ControllerKind::Job => build::<k8s::Job>,
        ControllerKind::CronJob => build::<k8s::CronJob>,
        ControllerKind::Pod => build_pod,
        ControllerKind::DeploymentConfig | ControllerKind::DaemonSet | ControllerKind::Other(_) => {
            build_from_owned_pods
        }
    }
}

/// Attaches every service whose selector matches the workload's labels.
pub(crate) fn attach_services(workload: &mut Workload, services: &[k8s::Service]) {
    workload.services = services
        .iter()
        .filter(|svc| service::selects(svc, &workload.labels))
        .map(service::parse)
        .collect();
}

fn build<K: Controller>(
    snapshot: &Snapshot,
    name: &str,
    kind: &ControllerKind,
) -> Option<Workload> {
    let controller = K::arena(snapshot).get(name)?;
    // An empty template selects every pod.
    let selector = Selector::from_map(controller.selector_labels().cloned().unwrap_or_default());
    let pods = snapshot
        .pods
        .iter()
        .filter(|p| {
            p.metadata
                .labels
                .as_ref()
                .map_or(selector.is_empty(), |labels| selector.matches_map(labels))
        })
        .map(pod::parse)
        .collect();

    let meta = controller.meta();
    let mut workload = Workload::new(name, kind.clone());
    workload.created_at = k8s::format_time(meta.creation_timestamp.as_ref());
    workload.resource_version = meta.resource_version.clone().unwrap_or_default();
    workload.set_labels(Labels::from(controller.workload_labels().cloned()));
    workload.set_pods(pods);
    controller.set_replicas(&mut workload);
    Some(workload)
}

/// A pod without a controller is its own workload.
fn build_pod(snapshot: &Snapshot, name: &str, kind: &ControllerKind) -> Option<Workload> {
    let p = snapshot.pods.get(name)?;

    let mut workload = Workload::new(name, kind.clone());
    workload.created_at = k8s::format_time(p.metadata.creation_timestamp.as_ref());
    workload.resource_version = p.resource_version().unwrap_or_default();
    workload.set_labels(Labels::from(p.metadata.labels.clone()));
    workload.set_pods(vec![pod::parse(p)]);

    let (replicas, available) = match pod::phase(p) {
        Some(Pod::SUCCEEDED) => (0, 0),
        Some(Pod::RUNNING) => (1, 1),
        _ => (1, 0),
    };
    workload.set_replicas(replicas, available);
    Some(workload)
}

/// Builds a workload for a controller that is not fetched, from the pods it controls. Labels and
/// metadata are taken from the first such pod.
fn build_from_owned_pods(
    snapshot: &Snapshot,
    name: &str,
    kind: &ControllerKind,
) -> Option<Workload> {
    let owned = snapshot
        .pods
        .iter()
        .filter(|p| {
            k8s::controller_ref(&p.metadata)
                .is_some_and(|r| r.name == name && r.kind == kind.as_str())
        })
        .collect::<Vec<_>>();

    let mut workload = Workload::new(name, kind.clone());
    if let Some(first) = owned.first() {
        workload.created_at = k8s::format_time(first.metadata.creation_timestamp.as_ref());
        workload.resource_version = first.resource_version().unwrap_or_default();
        workload.set_labels(Labels::from(first.metadata.labels.clone()));
    }
    workload.set_pods(owned.into_iter().map(pod::parse).collect());
    workload.infer_replicas_from_pods();
    Some(workload)
}

// === impl Controller ===

impl Controller for k8s::Deployment {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.deployments
    }

    fn selector_labels(&self) -> Option<&Map> {
        template_labels(self.spec.as_ref().map(|s| &s.template))
    }

    fn set_replicas(&self, workload: &mut Workload) {
        let status = self.status.as_ref();
        workload.set_replicas(
            status.and_then(|s| s.replicas).unwrap_or(0),
            status.and_then(|s| s.available_replicas).unwrap_or(0),
        );
    }
}

impl Controller for k8s::ReplicaSet {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.replica_sets
    }

    fn selector_labels(&self) -> Option<&Map> {
        template_labels(self.spec.as_ref().and_then(|s| s.template.as_ref()))
    }

    fn set_replicas(&self, workload: &mut Workload) {
        let status = self.status.as_ref();
        workload.set_replicas(
            status.map_or(0, |s| s.replicas),
            status.and_then(|s| s.available_replicas).unwrap_or(0),
        );
    }
}

impl Controller for k8s::ReplicationController {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.replication_controllers
    }

    fn selector_labels(&self) -> Option<&Map> {
        template_labels(self.spec.as_ref().and_then(|s| s.template.as_ref()))
    }

    fn set_replicas(&self, workload: &mut Workload) {
        let status = self.status.as_ref();
        workload.set_replicas(
            status.map_or(0, |s| s.replicas),
            status.and_then(|s| s.available_replicas).unwrap_or(0),
        );
    }
}

impl Controller for k8s::StatefulSet {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.stateful_sets
    }

    fn selector_labels(&self) -> Option<&Map> {
        template_labels(self.spec.as_ref().map(|s| &s.template))
    }

    fn set_replicas(&self, workload: &mut Workload) {
        let status = self.status.as_ref();
        workload.set_replicas(
            status.map_or(0, |s| s.replicas),
            status.and_then(|s| s.ready_replicas).unwrap_or(0),
        );
    }
}

impl Controller for k8s::Job {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.jobs
    }

    fn selector_labels(&self) -> Option<&Map> {
        template_labels(self.spec.as_ref().map(|s| &s.template))
    }

    fn workload_labels(&self) -> Option<&Map> {
        self.metadata.labels.as_ref()
    }

    fn set_replicas(&self, workload: &mut Workload) {
        let status = self.status.as_ref();
        let active = status.and_then(|s| s.active).unwrap_or(0);
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);
        workload.replicas = active + succeeded + failed;
        workload.available_replicas = active + succeeded;
        workload.unavailable_replicas = failed;
    }
}

impl Controller for k8s::CronJob {
    fn arena(snapshot: &Snapshot) -> &Arena<Self> {
        &snapshot.cron_jobs
    }

    fn selector_labels(&self) -> Option<&Map> {
        let job = self.spec.as_ref()?.job_template.spec.as_ref()?;
        template_labels(Some(&job.template))
    }

    fn workload_labels(&self) -> Option<&Map> {
        self.metadata.labels.as_ref()
    }

    /// CronJob status does not track pods; they are counted instead.
    fn set_replicas(&self, workload: &mut Workload) {
        workload.infer_replicas_from_pods();
    }
}
