use serde::Deserialize;
use topology_core::{ContainerInfo, Labels, Pod, Reference};
use topology_k8s_api::{self as k8s, ResourceExt};
use tracing::debug;

/// Set by the mesh's injector to list the containers it added to a pod.
pub const SIDECAR_STATUS_ANNOTATION: &str = "sidecar.istio.io/status";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SidecarStatus {
    containers: Vec<String>,
    init_containers: Vec<String>,
}

/// Extracts the inventory's view of a pod.
pub(crate) fn parse(pod: &k8s::Pod) -> Pod {
    let mut parsed = Pod {
        name: pod.name_any(),
        created_at: k8s::format_time(pod.metadata.creation_timestamp.as_ref()),
        created_by: pod
            .metadata
            .owner_references
            .iter()
            .flatten()
            .map(|r| Reference {
                name: r.name.clone(),
                kind: r.kind.clone(),
            })
            .collect(),
        status: phase(pod).unwrap_or_default().to_string(),
        ..Pod::default()
    };
    parsed.set_labels(Labels::from(pod.metadata.labels.clone()));

    if let Some(status) = sidecar_status(pod) {
        let spec = pod.spec.as_ref();
        parsed.istio_containers = status
            .containers
            .into_iter()
            .map(|name| lookup_image(name, spec.map(|s| s.containers.as_slice())))
            .collect();
        parsed.istio_init_containers = status
            .init_containers
            .into_iter()
            .map(|name| lookup_image(name, spec.and_then(|s| s.init_containers.as_deref())))
            .collect();
    }

    parsed
}

pub(crate) fn phase(pod: &k8s::Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// A malformed annotation is treated as if the pod had not been injected.
fn sidecar_status(pod: &k8s::Pod) -> Option<SidecarStatus> {
    let json = pod.annotations().get(SIDECAR_STATUS_ANNOTATION)?;
    match serde_json::from_str(json) {
        Ok(status) => Some(status),
        Err(error) => {
            debug!(pod = %pod.name_any(), %error, "Invalid sidecar status annotation");
            None
        }
    }
}

fn lookup_image(name: String, containers: Option<&[k8s::Container]>) -> ContainerInfo {
    let image = containers
        .into_iter()
        .flatten()
        .find(|c| c.name == name)
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    ContainerInfo { name, image }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{btreemap, convert_args};

    fn mk_pod(annotation: Option<&str>) -> k8s::Pod {
        let container = |name: &str, image: &str| k8s::Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        };
        k8s::Pod {
            metadata: k8s::ObjectMeta {
                namespace: Some("bookinfo".to_string()),
                name: Some("reviews-v1-5d8f7c9b4-x2x7q".to_string()),
                labels: Some(convert_args!(btreemap!(
                    "app" => "reviews",
                    "version" => "v1",
                ))),
                annotations: annotation.map(|a| {
                    convert_args!(btreemap!(
                        SIDECAR_STATUS_ANNOTATION => a,
                    ))
                }),
                owner_references: Some(vec![k8s::OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "ReplicaSet".to_string(),
                    name: "reviews-v1-5d8f7c9b4".to_string(),
                    uid: "uid".to_string(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(k8s::PodSpec {
                containers: vec![
                    container("reviews", "bookinfo/reviews:1.17"),
                    container("istio-proxy", "istio/proxyv2:1.20"),
                ],
                init_containers: Some(vec![container("istio-init", "istio/proxyv2:1.20")]),
                ..Default::default()
            }),
            status: Some(k8s::PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn parses_injected_pod() {
        let pod = parse(&mk_pod(Some(
            r#"{"containers":["istio-proxy"],"initContainers":["istio-init"],"volumes":["istio-envoy"]}"#,
        )));
        assert_eq!(pod.name, "reviews-v1-5d8f7c9b4-x2x7q");
        assert_eq!(pod.status, "Running");
        assert!(pod.is_running());
        assert_eq!((pod.app.as_str(), pod.version.as_str()), ("reviews", "v1"));
        assert!(pod.app_label && pod.version_label);
        assert_eq!(
            pod.created_by,
            vec![Reference {
                name: "reviews-v1-5d8f7c9b4".to_string(),
                kind: "ReplicaSet".to_string(),
            }]
        );
        assert_eq!(
            pod.istio_containers,
            vec![ContainerInfo {
                name: "istio-proxy".to_string(),
                image: "istio/proxyv2:1.20".to_string(),
            }]
        );
        assert_eq!(
            pod.istio_init_containers,
            vec![ContainerInfo {
                name: "istio-init".to_string(),
                image: "istio/proxyv2:1.20".to_string(),
            }]
        );
        assert!(pod.has_sidecar());
    }

    #[test]
    fn unknown_containers_have_no_image() {
        let pod = parse(&mk_pod(Some(r#"{"containers":["missing"]}"#)));
        assert_eq!(pod.istio_containers[0].image, "");
        assert!(pod.istio_init_containers.is_empty());
        assert!(pod.has_sidecar());
    }

    #[test]
    fn uninjected_pods_have_no_sidecar() {
        for annotation in [None, Some("not json"), Some(r#"{"containers":[]}"#)] {
            let pod = parse(&mk_pod(annotation));
            assert!(!pod.has_sidecar(), "{annotation:?}");
            assert!(pod.istio_containers.is_empty());
        }
    }
}
