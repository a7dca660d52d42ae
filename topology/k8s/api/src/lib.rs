#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;

pub use self::labels::{Labels, Selector};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{
            Container, Pod, PodSpec, PodStatus, PodTemplateSpec, ReplicationController, Service,
            ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::apis::meta::v1::{OwnerReference, Time},
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, ResourceExt},
    Client, Error, Resource,
};

/// Returns the owner reference flagged as the object's managing controller, if any.
pub fn controller_ref(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true))
}

/// Formats a Kubernetes timestamp in RFC 3339, or the empty string when unset.
pub fn format_time(time: Option<&Time>) -> String {
    time.map(|Time(t)| t.to_string()).unwrap_or_default()
}
