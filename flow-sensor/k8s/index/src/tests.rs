mod pods;

use crate::{Index, SharedIndex};
use flow_sensor_core::{Endpoint, EndpointMatch, Entity, Protocol, ResolveEntities};
use k8s_openapi::{
    api::core::v1 as k8s,
    apimachinery::pkg::{
        apis::meta::v1::{ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
use pretty_assertions::assert_eq;

fn mk_pod(ns: &str, name: &str, ip: &str, container_id: &str) -> k8s::Pod {
    k8s::Pod {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(k8s::PodSpec {
            containers: vec![k8s::Container {
                name: "main".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(k8s::PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some(ip.to_string()),
            container_statuses: Some(vec![k8s::ContainerStatus {
                name: "main".to_string(),
                container_id: Some(format!("containerd://{container_id}")),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

fn owned_by(mut pod: k8s::Pod, kind: &str, name: &str) -> k8s::Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        kind: kind.to_string(),
        name: name.to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

fn with_labels<'l>(
    mut pod: k8s::Pod,
    labels: impl IntoIterator<Item = (&'l str, &'l str)>,
) -> k8s::Pod {
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(labels.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
    pod
}

fn with_named_port(mut pod: k8s::Pod, name: &str, port: i32) -> k8s::Pod {
    if let Some(container) = pod
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
    {
        container
            .ports
            .get_or_insert_with(Vec::new)
            .push(k8s::ContainerPort {
                name: Some(name.to_string()),
                container_port: port,
                ..Default::default()
            });
    }
    pod
}

/// A pod of the deployment `name`, created through one of its replica sets.
fn mk_deployment_pod(ns: &str, name: &str, ip: &str, container_id: &str) -> k8s::Pod {
    let pod = mk_pod(ns, &format!("{name}-7d4b9c6f5-x2k8p"), ip, container_id);
    let pod = owned_by(pod, "ReplicaSet", &format!("{name}-7d4b9c6f5"));
    with_labels(pod, [("app", name), ("pod-template-hash", "7d4b9c6f5")])
}

fn mk_service(
    ns: &str,
    name: &str,
    cluster_ip: &str,
    selector: impl IntoIterator<Item = (&'static str, &'static str)>,
    ports: impl IntoIterator<Item = k8s::ServicePort>,
) -> k8s::Service {
    k8s::Service {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(k8s::ServiceSpec {
            cluster_ip: Some(cluster_ip.to_string()),
            selector: Some(
                selector
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ports: Some(ports.into_iter().collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_port(port: i32, target_port: Option<IntOrString>) -> k8s::ServicePort {
    k8s::ServicePort {
        port,
        target_port,
        ..Default::default()
    }
}

fn mk_node(
    name: &str,
    addresses: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> k8s::Node {
    k8s::Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(k8s::NodeStatus {
            addresses: Some(
                addresses
                    .into_iter()
                    .map(|(type_, address)| k8s::NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tcp(addr: &str) -> Endpoint {
    Endpoint {
        addr: addr.parse().unwrap(),
        protocol: Protocol::Tcp,
    }
}

fn deployment(id: &str, ports: impl IntoIterator<Item = u16>) -> EndpointMatch {
    EndpointMatch {
        entity: Entity::Deployment(id.to_string()),
        ports: ports.into_iter().collect(),
    }
}

const CONTAINER_A: &str = "4f0a2b1c9d8e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a";
const CONTAINER_B: &str = "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e4d3c2b1a0f9e8d";

#[test]
fn reports_index_size() {
    use kubert::index::IndexNamespacedResource;

    let index: SharedIndex = Index::shared();
    let mut prom = prometheus_client::registry::Registry::default();
    crate::metrics::register(prom.sub_registry_with_prefix("flow_index"), index.clone());

    index
        .write()
        .apply(mk_deployment_pod("ns", "web", "10.1.0.5", CONTAINER_A));
    index.write().apply(mk_service(
        "ns",
        "web",
        "10.2.0.10",
        [("app", "web")],
        [service_port(80, None)],
    ));

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    assert!(text.contains("flow_index_pods 1\n"), "{text}");
    assert!(text.contains("flow_index_services 1\n"), "{text}");
    assert!(text.contains("flow_index_nodes 0\n"), "{text}");

    assert_eq!(
        index.resolve_container(CONTAINER_A),
        Some("ns/Deployment/web".to_string())
    );
}
