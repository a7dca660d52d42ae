//! Collapses controller ownership chains into one entry per workload.
//!
//! Pods name their immediate controller. A `ReplicaSet` is usually owned by a `Deployment`, a
//! `ReplicationController` by a `DeploymentConfig`, and a `Job` by a `CronJob`; ownership is never
//! deeper than that, so a single collapsing pass over the pod-derived controllers suffices.

use crate::{platform::Snapshot, workload};
use std::collections::{btree_map::Entry, BTreeMap};
use topology_core::{ControllerKind, Workload};
use topology_k8s_api::{self as k8s, labels::Map, ResourceExt, Selector};
use tracing::{debug, info};

/// Controller names mapped to the kind of workload they resolve to.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Controllers(BTreeMap<String, ControllerKind>);

static NO_LABELS: Map = Map::new();

/// Resolves the snapshot to workloads, sorted by name.
pub(crate) fn workloads(snapshot: &Snapshot, labels: Option<&Selector>) -> Vec<Workload> {
    Controllers::resolve(snapshot, labels).build(snapshot)
}

// === impl Controllers ===

impl Controllers {
    /// Collects the controllers named by pods. Pods without any owner are their own workload.
    fn from_pods(snapshot: &Snapshot) -> Self {
        let mut controllers = Self::default();
        for pod in snapshot.pods.iter() {
            match pod.metadata.owner_references.as_deref() {
                Some(refs) if !refs.is_empty() => {
                    for owner in refs.iter().filter(|r| r.controller == Some(true)) {
                        controllers.claim(&owner.name, ControllerKind::from_kind(&owner.kind));
                    }
                }
                _ => {
                    controllers
                        .0
                        .entry(pod.name_any())
                        .or_insert(ControllerKind::Pod);
                }
            }
        }
        controllers
    }

    /// Records that `name` is a controller of `kind`, keeping the higher-precedence kind if the
    /// name was already claimed.
    fn claim(&mut self, name: &str, kind: ControllerKind) {
        match self.0.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(kind);
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() != kind {
                    let current = entry.get().clone();
                    entry.insert(current.preferred(kind));
                }
            }
        }
    }

    /// Replaces owned controllers by their owners.
    fn collapse(&mut self, snapshot: &Snapshot) {
        let entries = self
            .0
            .iter()
            .map(|(name, kind)| (name.clone(), kind.clone()))
            .collect::<Vec<_>>();

        for (name, kind) in entries {
            let owner = match kind {
                ControllerKind::ReplicaSet => snapshot
                    .replica_sets
                    .get(&name)
                    .and_then(|rs| k8s::controller_ref(&rs.metadata)),
                ControllerKind::ReplicationController => snapshot
                    .replication_controllers
                    .get(&name)
                    .and_then(|rc| k8s::controller_ref(&rc.metadata)),
                ControllerKind::Job => snapshot
                    .jobs
                    .get(&name)
                    .and_then(|job| k8s::controller_ref(&job.metadata)),
                _ => None,
            };
            let Some(owner) = owner else {
                continue;
            };

            self.claim(&owner.name, ControllerKind::from_kind(&owner.kind));

            // Deleting a CronJob orphans its Jobs rather than deleting them.
            if kind == ControllerKind::Job && !snapshot.cron_jobs.contains(&owner.name) {
                debug!(job = %name, cron_job = %owner.name, "Keeping orphaned Job");
                continue;
            }
            self.0.remove(&name);
        }
    }

    /// Adds controllers that currently have no pods so that scaled-down workloads still appear.
    fn add_idle(&mut self, snapshot: &Snapshot, labels: Option<&Selector>) {
        let selected = |template: Option<&k8s::PodTemplateSpec>| {
            labels.map_or(true, |selector| {
                selector.matches_map(template_labels(template).unwrap_or(&NO_LABELS))
            })
        };

        for d in snapshot.deployments.iter() {
            let template = d.spec.as_ref().map(|s| &s.template);
            if selected(template) {
                self.add_if_absent(d.name_any(), ControllerKind::Deployment);
            }
        }
        for rs in snapshot.replica_sets.iter() {
            let template = rs.spec.as_ref().and_then(|s| s.template.as_ref());
            if k8s::controller_ref(&rs.metadata).is_none() && selected(template) {
                self.add_if_absent(rs.name_any(), ControllerKind::ReplicaSet);
            }
        }
        for rc in snapshot.replication_controllers.iter() {
            let template = rc.spec.as_ref().and_then(|s| s.template.as_ref());
            if k8s::controller_ref(&rc.metadata).is_none() && selected(template) {
                self.add_if_absent(rc.name_any(), ControllerKind::ReplicationController);
            }
        }
        for ss in snapshot.stateful_sets.iter() {
            let template = ss.spec.as_ref().map(|s| &s.template);
            if selected(template) {
                self.add_if_absent(ss.name_any(), ControllerKind::StatefulSet);
            }
        }
    }

    fn add_if_absent(&mut self, name: String, kind: ControllerKind) {
        self.0.entry(name).or_insert(kind);
    }

    /// Builds a workload for each controller. Controllers whose object is missing from the
    /// snapshot are skipped.
    fn build(self, snapshot: &Snapshot) -> Vec<Workload> {
        let mut workloads = Vec::with_capacity(self.0.len());
        for (name, kind) in self.0 {
            let build = workload::builder(&kind);
            match build(snapshot, &name, &kind) {
                Some(mut workload) => {
                    workload::attach_services(&mut workload, &snapshot.services);
                    workloads.push(workload);
                }
                None => info!(%name, %kind, "Workload not found"),
            }
        }
        workloads
    }

    pub(crate) fn resolve(snapshot: &Snapshot, labels: Option<&Selector>) -> Self {
        let mut controllers = Self::from_pods(snapshot);
        controllers.collapse(snapshot);
        controllers.add_idle(snapshot, labels);
        controllers
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> BTreeMap<String, ControllerKind> {
        self.0
    }
}

pub(crate) fn template_labels(template: Option<&k8s::PodTemplateSpec>) -> Option<&Map> {
    template?.metadata.as_ref()?.labels.as_ref()
}
