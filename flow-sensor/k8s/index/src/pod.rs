use crate::{parse_protocol, Index, PodRef};
use ahash::AHashMap as HashMap;
use flow_sensor_core::{connection::normalize_container_id, Protocol};
use k8s_openapi::api::core::v1 as k8s;
use std::{collections::BTreeMap, net::IpAddr};
use tracing::{debug, instrument, trace, warn};

/// The label a deployment's controller sets on the pods of each of its replica sets.
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Holds the state of an individual pod.
#[derive(Debug)]
pub(crate) struct Pod {
    /// The id of the workload that owns the pod, as `<namespace>/<kind>/<name>`.
    pub(crate) deployment: String,

    pub(crate) labels: BTreeMap<String, String>,

    /// The pod's own IPs. Empty for host-network pods and for pods that have terminated.
    ips: Vec<IpAddr>,

    /// Normalized ids of the pod's containers.
    container_ids: Vec<String>,

    /// Container ports by name, to resolve named service target ports.
    named_ports: HashMap<(String, Protocol), u16>,
}

// === impl Pod ===

impl Pod {
    fn new(pod_ref: &PodRef, pod: &k8s::Pod) -> Self {
        let status = pod.status.as_ref();
        let spec = pod.spec.as_ref();

        let host_network = spec.and_then(|spec| spec.host_network).unwrap_or(false);
        let terminated = status
            .and_then(|status| status.phase.as_deref())
            .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
        let ips = if host_network || terminated {
            Vec::new()
        } else {
            status
                .and_then(|status| status.pod_ip.as_deref())
                .filter(|ip| !ip.is_empty())
                .and_then(|ip| match ip.parse() {
                    Ok(ip) => Some(ip),
                    Err(error) => {
                        warn!(%error, ip, "Invalid pod IP");
                        None
                    }
                })
                .into_iter()
                .collect()
        };

        let container_ids = status
            .into_iter()
            .flat_map(|status| {
                status
                    .container_statuses
                    .iter()
                    .flatten()
                    .chain(status.init_container_statuses.iter().flatten())
                    .chain(status.ephemeral_container_statuses.iter().flatten())
            })
            .filter_map(|container| container.container_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(|id| normalize_container_id(id).to_string())
            .collect();

        let mut named_ports = HashMap::default();
        for port in spec
            .into_iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter().flatten())
        {
            let name = match port.name.as_ref() {
                Some(name) => name,
                None => continue,
            };
            match (
                u16::try_from(port.container_port),
                parse_protocol(port.protocol.as_deref()),
            ) {
                (Ok(number), Some(protocol)) => {
                    named_ports.insert((name.clone(), protocol), number);
                }
                _ => trace!(%name, port = port.container_port, "Skipping container port"),
            }
        }

        Self {
            deployment: workload_id(pod_ref, pod),
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            ips,
            container_ids,
            named_ports,
        }
    }

    pub(crate) fn named_port(&self, name: &str, protocol: Protocol) -> Option<u16> {
        self.named_ports.get(&(name.to_string(), protocol)).copied()
    }
}

/// Determines the workload a pod belongs to.
///
/// Pods created through a deployment are owned by a replica set named after the deployment and the
/// pod template's hash, so these are attributed to the deployment itself. Pods with any other
/// controller are attributed to that controller, and unowned pods are their own workload.
fn workload_id(pod_ref: &PodRef, pod: &k8s::Pod) -> String {
    let PodRef { namespace, name } = pod_ref;
    let owners = pod.metadata.owner_references.iter().flatten();
    let owner = owners
        .clone()
        .find(|owner| owner.controller == Some(true))
        .or_else(|| owners.clone().next());

    match owner {
        Some(owner) if owner.kind == "ReplicaSet" => {
            let deployment = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(POD_TEMPLATE_HASH_LABEL))
                .and_then(|hash| owner.name.strip_suffix(hash.as_str()))
                .and_then(|prefix| prefix.strip_suffix('-'))
                .filter(|deployment| !deployment.is_empty());
            match deployment {
                Some(deployment) => format!("{namespace}/Deployment/{deployment}"),
                None => format!("{namespace}/ReplicaSet/{}", owner.name),
            }
        }
        Some(owner) => format!("{namespace}/{}/{}", owner.kind, owner.name),
        None => format!("{namespace}/Pod/{name}"),
    }
}

// === impl Index ===

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        self.apply_pod(pod)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_pod(PodRef { namespace, name })
    }
}

impl Index {
    #[instrument(
        skip(self, pod),
        fields(
            ns = ?pod.metadata.namespace,
            name = ?pod.metadata.name,
        )
    )]
    fn apply_pod(&mut self, pod: k8s::Pod) {
        let pod_ref = match (pod.metadata.namespace.clone(), pod.metadata.name.clone()) {
            (Some(namespace), Some(name)) => PodRef { namespace, name },
            _ => {
                warn!("Ignoring pod without a namespace or name");
                return;
            }
        };

        let pod = Pod::new(&pod_ref, &pod);
        self.unlink_pod(&pod_ref);
        for ip in &pod.ips {
            self.pods_by_ip.insert(*ip, pod_ref.clone());
        }
        for id in &pod.container_ids {
            self.deployments_by_container
                .insert(id.clone(), pod.deployment.clone());
        }
        debug!(
            deployment = %pod.deployment,
            ips = ?pod.ips,
            containers = pod.container_ids.len(),
            "Indexed"
        );

        self.pods
            .entry(pod_ref.namespace)
            .or_default()
            .insert(pod_ref.name, pod);
    }

    #[instrument(
        skip(self, pod_ref),
        fields(
            ns = %pod_ref.namespace,
            name = %pod_ref.name,
        )
    )]
    fn delete_pod(&mut self, pod_ref: PodRef) {
        if self.unlink_pod(&pod_ref).is_some() {
            debug!("Deleted");
        }
    }

    /// Removes a pod and all lookups derived from it.
    fn unlink_pod(&mut self, pod_ref: &PodRef) -> Option<Pod> {
        let pods = self.pods.get_mut(&pod_ref.namespace)?;
        let pod = pods.remove(&pod_ref.name)?;
        if pods.is_empty() {
            self.pods.remove(&pod_ref.namespace);
        }

        for ip in &pod.ips {
            // The IP may already have been reassigned to another pod.
            if self.pods_by_ip.get(ip) == Some(pod_ref) {
                self.pods_by_ip.remove(ip);
            }
        }
        for id in &pod.container_ids {
            self.deployments_by_container.remove(id);
        }
        Some(pod)
    }
}
