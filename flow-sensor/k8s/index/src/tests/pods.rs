use super::*;
use pretty_assertions::assert_eq;
use kubert::index::IndexNamespacedResource;

#[test]
fn deployment_pods_resolve_to_their_deployment() {
    let mut index = Index::default();
    index.apply(mk_deployment_pod("ns", "web", "10.1.0.5", CONTAINER_A));

    // Collectors may report ids with or without a runtime scheme, truncated or not.
    for id in [
        format!("containerd://{CONTAINER_A}"),
        CONTAINER_A.to_string(),
        CONTAINER_A[..12].to_string(),
    ] {
        assert_eq!(
            index.resolve_container(&id),
            Some("ns/Deployment/web".to_string())
        );
    }
    assert_eq!(index.resolve_container(CONTAINER_B), None);

    assert_eq!(
        index.resolve_endpoint(&tcp("10.1.0.5:8080")),
        vec![deployment("ns/Deployment/web", [8080])]
    );
    assert!(index.resolve_endpoint(&tcp("10.1.0.6:8080")).is_empty());
}

#[test]
fn workloads_follow_pod_owners() {
    let mut index = Index::default();
    index.apply(owned_by(
        mk_pod("ns", "db-0", "10.1.0.5", CONTAINER_A),
        "StatefulSet",
        "db",
    ));
    index.apply(mk_pod("ns", "debug", "10.1.0.6", CONTAINER_B));

    // Without the template hash label, a replica set can't be attributed to a deployment.
    let bare = owned_by(
        mk_pod("other", "rs-abcde", "10.1.0.7", "0123456789abcdef"),
        "ReplicaSet",
        "rs",
    );
    index.apply(bare);

    assert_eq!(
        index.resolve_container(CONTAINER_A),
        Some("ns/StatefulSet/db".to_string())
    );
    assert_eq!(
        index.resolve_container(CONTAINER_B),
        Some("ns/Pod/debug".to_string())
    );
    assert_eq!(
        index.resolve_container("0123456789abcdef"),
        Some("other/ReplicaSet/rs".to_string())
    );
}

#[test]
fn host_network_pods_do_not_claim_the_node_ip() {
    let mut index = Index::default();
    let mut pod = mk_deployment_pod("kube-system", "proxy", "192.168.1.10", CONTAINER_A);
    if let Some(spec) = pod.spec.as_mut() {
        spec.host_network = Some(true);
    }
    index.apply(pod);

    assert_eq!(
        index.resolve_container(CONTAINER_A),
        Some("kube-system/Deployment/proxy".to_string())
    );
    assert!(index.resolve_endpoint(&tcp("192.168.1.10:10250")).is_empty());
}

#[test]
fn updates_and_deletes_remove_stale_lookups() {
    let mut index = Index::default();
    index.apply(mk_deployment_pod("ns", "web", "10.1.0.5", CONTAINER_A));

    // The pod is rescheduled with a new container and IP.
    index.apply(mk_deployment_pod("ns", "web", "10.1.0.9", CONTAINER_B));
    assert_eq!(index.resolve_container(CONTAINER_A), None);
    assert!(index.resolve_endpoint(&tcp("10.1.0.5:8080")).is_empty());
    assert_eq!(
        index.resolve_endpoint(&tcp("10.1.0.9:8080")),
        vec![deployment("ns/Deployment/web", [8080])]
    );

    <Index as IndexNamespacedResource<k8s::Pod>>::delete(
        &mut index,
        "ns".to_string(),
        "web-7d4b9c6f5-x2k8p".to_string(),
    );
    assert_eq!(index.resolve_container(CONTAINER_B), None);
    assert!(index.resolve_endpoint(&tcp("10.1.0.9:8080")).is_empty());
    assert!(index.pods.is_empty());
}

#[test]
fn reused_ips_resolve_to_the_newest_pod() {
    let mut index = Index::default();
    index.apply(mk_deployment_pod("ns", "old", "10.1.0.5", CONTAINER_A));
    index.apply(mk_deployment_pod("ns", "new", "10.1.0.5", CONTAINER_B));

    <Index as IndexNamespacedResource<k8s::Pod>>::delete(
        &mut index,
        "ns".to_string(),
        "old-7d4b9c6f5-x2k8p".to_string(),
    );
    assert_eq!(
        index.resolve_endpoint(&tcp("10.1.0.5:443")),
        vec![deployment("ns/Deployment/new", [443])]
    );
}

#[test]
fn terminated_pods_release_their_ip() {
    let mut index = Index::default();
    let mut pod = mk_deployment_pod("ns", "job", "10.1.0.5", CONTAINER_A);
    if let Some(status) = pod.status.as_mut() {
        status.phase = Some("Succeeded".to_string());
    }
    index.apply(pod);

    assert!(index.resolve_endpoint(&tcp("10.1.0.5:443")).is_empty());
    assert_eq!(
        index.resolve_container(CONTAINER_A),
        Some("ns/Deployment/job".to_string())
    );
}
