//! Cluster entity index
//!
//! Caches the cluster state needed to attribute collector-reported connections to logical
//! entities. It watches the following resources:
//!
//! - Each `Pod` is indexed by its IP and by the ids of its containers. Both resolve to the
//!   deployment that owns the pod.
//! - Each `Service` is indexed by its cluster IP. A service endpoint resolves to the deployments
//!   of the pods its selector matches, on the ports its target port refers to.
//! - Each `Node` is indexed by its internal and external addresses.
//!
//! ```text
//! [ container id ] -> [ Pod ] -> [ Deployment ]
//! [ pod IP ] -------> [ Pod ]
//! [ cluster IP ] ---> [ Service ] -> [ Pod ]*
//! [ node IP ] ------> [ Node ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod node;
mod pod;
mod service;

#[cfg(test)]
mod tests;

use self::{pod::Pod, service::Service};
use ahash::AHashMap as HashMap;
use flow_sensor_core::{
    connection::normalize_container_id, Endpoint, EndpointMatch, Entity, Protocol,
    ResolveEntities,
};
use parking_lot::RwLock;
use std::{net::IpAddr, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds all indexing state. Updated by the tasks that process watch events and read by the flow
/// manager on every cycle.
#[derive(Debug, Default)]
pub struct Index {
    /// Pods by namespace and name.
    pods: HashMap<String, HashMap<String, Pod>>,
    pods_by_ip: HashMap<IpAddr, PodRef>,
    deployments_by_container: HashMap<String, String>,

    services: HashMap<ServiceRef, Service>,
    services_by_ip: HashMap<IpAddr, ServiceRef>,

    /// Node addresses by node name.
    nodes: HashMap<String, Vec<IpAddr>>,
    nodes_by_ip: HashMap<IpAddr, String>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct PodRef {
    namespace: String,
    name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ServiceRef {
    namespace: String,
    name: String,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    fn pod(&self, pod: &PodRef) -> Option<&Pod> {
        self.pods.get(&pod.namespace)?.get(&pod.name)
    }
}

impl ResolveEntities for Index {
    fn resolve_container(&self, container_id: &str) -> Option<String> {
        self.deployments_by_container
            .get(normalize_container_id(container_id))
            .cloned()
    }

    fn resolve_endpoint(&self, endpoint: &Endpoint) -> Vec<EndpointMatch> {
        let ip = endpoint.addr.ip();
        let port = endpoint.addr.port();

        if let Some(pod) = self.pods_by_ip.get(&ip).and_then(|pod| self.pod(pod)) {
            return vec![EndpointMatch {
                entity: Entity::Deployment(pod.deployment.clone()),
                ports: vec![port],
            }];
        }

        if let Some(service) = self.services_by_ip.get(&ip) {
            return self.resolve_service(service, port, endpoint.protocol);
        }

        if let Some(node) = self.nodes_by_ip.get(&ip) {
            return vec![EndpointMatch {
                entity: Entity::Node(node.clone()),
                ports: vec![port],
            }];
        }

        Vec::new()
    }
}

/// Parses a Kubernetes port protocol, which defaults to TCP. Protocols that collectors don't
/// report (i.e. SCTP) are `None`.
fn parse_protocol(protocol: Option<&str>) -> Option<Protocol> {
    match protocol {
        None | Some("TCP") => Some(Protocol::Tcp),
        Some("UDP") => Some(Protocol::Udp),
        Some(_) => None,
    }
}
