use topology_core::{Labels, Port, Service};
use topology_k8s_api::{self as k8s, ResourceExt, Selector};

pub(crate) fn parse(service: &k8s::Service) -> Service {
    let spec = service.spec.as_ref();
    Service {
        name: service.name_any(),
        created_at: k8s::format_time(service.metadata.creation_timestamp.as_ref()),
        resource_version: service.resource_version().unwrap_or_default(),
        namespace: service.namespace().unwrap_or_default(),
        labels: Labels::from(service.metadata.labels.clone()),
        service_type: spec.and_then(|s| s.type_.clone()).unwrap_or_default(),
        ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .into_iter()
            .flatten()
            .map(|p| Port {
                name: p.name.clone().unwrap_or_default(),
                protocol: p.protocol.clone().unwrap_or_default(),
                port: p.port,
            })
            .collect(),
    }
}

/// Returns true if the service routes to pods with the given labels. Services without a selector
/// are managed externally and select nothing.
pub(crate) fn selects(service: &k8s::Service, labels: &Labels) -> bool {
    match service.spec.as_ref().and_then(|s| s.selector.as_ref()) {
        Some(selector) if !selector.is_empty() => {
            Selector::from_map(selector.clone()).matches(labels)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{btreemap, convert_args};

    fn mk_service(selector: Option<k8s::labels::Map>) -> k8s::Service {
        k8s::Service {
            metadata: k8s::ObjectMeta {
                namespace: Some("bookinfo".to_string()),
                name: Some("reviews".to_string()),
                resource_version: Some("1234".to_string()),
                ..Default::default()
            },
            spec: Some(k8s::ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some("10.0.0.12".to_string()),
                selector,
                ports: Some(vec![k8s::ServicePort {
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    port: 9080,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn parses_service() {
        let svc = parse(&mk_service(None));
        assert_eq!(svc.name, "reviews");
        assert_eq!(svc.namespace, "bookinfo");
        assert_eq!(svc.resource_version, "1234");
        assert_eq!(svc.service_type, "ClusterIP");
        assert_eq!(svc.ip, "10.0.0.12");
        assert_eq!(
            svc.ports,
            vec![Port {
                name: "http".to_string(),
                protocol: "TCP".to_string(),
                port: 9080,
            }]
        );
    }

    #[test]
    fn selects_by_selector() {
        let labels = Labels::from_iter(vec![("app", "reviews"), ("version", "v1")]);

        let svc = mk_service(Some(convert_args!(btreemap!("app" => "reviews"))));
        assert!(selects(&svc, &labels));

        let svc = mk_service(Some(convert_args!(btreemap!("app" => "ratings"))));
        assert!(!selects(&svc, &labels));

        assert!(!selects(&mk_service(Some(Default::default())), &labels));
        assert!(!selects(&mk_service(None), &labels));
    }
}
