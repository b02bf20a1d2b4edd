use crate::{parse_protocol, pod::Pod, Index, ServiceRef};
use flow_sensor_core::{EndpointMatch, Entity, Protocol};
use k8s_openapi::{api::core::v1 as k8s, apimachinery::pkg::util::intstr::IntOrString};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};
use tracing::{debug, instrument, trace, warn};

#[derive(Debug)]
pub(crate) struct Service {
    ips: Vec<IpAddr>,

    /// Empty for services without a selector, whose endpoints are managed externally.
    selector: BTreeMap<String, String>,

    ports: Vec<ServicePort>,
}

#[derive(Debug, PartialEq, Eq)]
struct ServicePort {
    port: u16,
    protocol: Protocol,
    target: TargetPort,
}

#[derive(Debug, PartialEq, Eq)]
enum TargetPort {
    Number(u16),
    Name(String),
}

// === impl Service ===

impl Service {
    fn new(service: &k8s::Service) -> Self {
        let spec = service.spec.as_ref();

        let mut ips = Vec::new();
        let cluster_ips = spec
            .into_iter()
            .flat_map(|spec| spec.cluster_ip.iter().chain(spec.cluster_ips.iter().flatten()))
            .filter(|ip| !ip.is_empty() && *ip != "None");
        for ip in cluster_ips {
            match ip.parse::<IpAddr>() {
                Ok(ip) if !ips.contains(&ip) => ips.push(ip),
                Ok(_) => {}
                Err(error) => warn!(%error, cluster_ip = %ip, "Invalid cluster IP"),
            }
        }

        let ports = spec
            .into_iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .filter_map(|port| {
                let number = u16::try_from(port.port).ok()?;
                let protocol = parse_protocol(port.protocol.as_deref())?;
                let target = match port.target_port.as_ref() {
                    None => TargetPort::Number(number),
                    Some(IntOrString::Int(target)) => {
                        TargetPort::Number(u16::try_from(*target).ok()?)
                    }
                    Some(IntOrString::String(target)) => match target.parse() {
                        Ok(target) => TargetPort::Number(target),
                        Err(_) => TargetPort::Name(target.clone()),
                    },
                };
                Some(ServicePort {
                    port: number,
                    protocol,
                    target,
                })
            })
            .collect();

        Self {
            ips,
            selector: spec
                .and_then(|spec| spec.selector.clone())
                .unwrap_or_default(),
            ports,
        }
    }

    fn selects(&self, pod: &Pod) -> bool {
        !self.selector.is_empty()
            && self
                .selector
                .iter()
                .all(|(key, value)| pod.labels.get(key) == Some(value))
    }
}

// === impl Index ===

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, service: k8s::Service) {
        self.apply_service(service)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_service(ServiceRef { namespace, name })
    }
}

impl Index {
    #[instrument(
        skip(self, service),
        fields(
            ns = ?service.metadata.namespace,
            name = ?service.metadata.name,
        )
    )]
    fn apply_service(&mut self, service: k8s::Service) {
        let service_ref = match (
            service.metadata.namespace.clone(),
            service.metadata.name.clone(),
        ) {
            (Some(namespace), Some(name)) => ServiceRef { namespace, name },
            _ => {
                warn!("Ignoring service without a namespace or name");
                return;
            }
        };

        let service = Service::new(&service);
        self.services_by_ip.retain(|_, s| *s != service_ref);
        for ip in &service.ips {
            self.services_by_ip.insert(*ip, service_ref.clone());
        }
        debug!(ips = ?service.ips, ports = service.ports.len(), "Indexed");
        self.services.insert(service_ref, service);
    }

    #[instrument(
        skip(self, service_ref),
        fields(
            ns = %service_ref.namespace,
            name = %service_ref.name,
        )
    )]
    fn delete_service(&mut self, service_ref: ServiceRef) {
        self.services_by_ip.retain(|_, s| *s != service_ref);
        if self.services.remove(&service_ref).is_some() {
            debug!("Deleted");
        }
    }

    /// Resolves a service endpoint to the deployments backing it, along with the target ports on
    /// each deployment's pods.
    pub(crate) fn resolve_service(
        &self,
        service_ref: &ServiceRef,
        port: u16,
        protocol: Protocol,
    ) -> Vec<EndpointMatch> {
        let service = match self.services.get(service_ref) {
            Some(service) => service,
            None => return Vec::new(),
        };
        let target = match service
            .ports
            .iter()
            .find(|sp| sp.port == port && sp.protocol == protocol)
        {
            Some(sp) => &sp.target,
            None => {
                trace!(service = %service_ref.name, port, ?protocol, "No matching service port");
                return Vec::new();
            }
        };

        let mut ports_by_deployment = BTreeMap::<&str, BTreeSet<u16>>::new();
        let pods = self
            .pods
            .get(&service_ref.namespace)
            .into_iter()
            .flat_map(|pods| pods.values());
        for pod in pods.filter(|pod| service.selects(pod)) {
            let port = match target {
                TargetPort::Number(port) => Some(*port),
                TargetPort::Name(name) => pod.named_port(name, protocol),
            };
            if let Some(port) = port {
                ports_by_deployment
                    .entry(&pod.deployment)
                    .or_default()
                    .insert(port);
            }
        }

        ports_by_deployment
            .into_iter()
            .map(|(deployment, ports)| EndpointMatch {
                entity: Entity::Deployment(deployment.to_string()),
                ports: ports.into_iter().collect(),
            })
            .collect()
    }
}
