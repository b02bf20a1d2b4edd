mod delta;

use ahash::AHashMap as HashMap;
use flow_sensor_core::{
    ConnectionBatch, ConnectionReport, Endpoint, EndpointMatch, Entity, FlowIndicator, Protocol,
    ResolveEntities, Role, Timestamp,
};
use std::net::SocketAddr;

/// A resolver over fixed maps of containers and endpoints.
#[derive(Debug, Default)]
struct MockResolver {
    containers: HashMap<String, String>,
    endpoints: HashMap<(SocketAddr, Protocol), Vec<EndpointMatch>>,
}

impl MockResolver {
    fn with_container(mut self, container_id: &str, deployment: &str) -> Self {
        self.containers
            .insert(container_id.to_string(), deployment.to_string());
        self
    }

    fn with_endpoint(mut self, addr: &str, protocol: Protocol, entity: Entity, port: u16) -> Self {
        self.add_endpoint(addr, protocol, entity, port);
        self
    }

    fn add_endpoint(&mut self, addr: &str, protocol: Protocol, entity: Entity, port: u16) {
        self.endpoints
            .entry((addr.parse().unwrap(), protocol))
            .or_default()
            .push(EndpointMatch {
                entity,
                ports: vec![port],
            });
    }
}

impl ResolveEntities for MockResolver {
    fn resolve_container(&self, container_id: &str) -> Option<String> {
        self.containers.get(container_id).cloned()
    }

    fn resolve_endpoint(&self, endpoint: &Endpoint) -> Vec<EndpointMatch> {
        self.endpoints
            .get(&(endpoint.addr, endpoint.protocol))
            .cloned()
            .unwrap_or_default()
    }
}

/// Returns a fixed point in time offset by `secs`.
fn ts(secs: i64) -> Timestamp {
    Timestamp::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn deployment(id: &str) -> Entity {
    Entity::Deployment(id.to_string())
}

fn report(
    local: &str,
    remote: &str,
    protocol: Protocol,
    role: Role,
    container: &str,
) -> ConnectionReport {
    ConnectionReport {
        local_address: local.parse().unwrap(),
        remote_address: remote.parse().unwrap(),
        protocol,
        role,
        container_id: container.to_string(),
        close_timestamp: None,
    }
}

fn outgoing(remote: &str, container: &str) -> ConnectionReport {
    report("10.1.0.5:51234", remote, Protocol::Tcp, Role::Client, container)
}

fn incoming(local: &str, remote: &str, container: &str) -> ConnectionReport {
    report(local, remote, Protocol::Tcp, Role::Server, container)
}

fn closed(mut report: ConnectionReport, at: Timestamp) -> ConnectionReport {
    report.close_timestamp = Some(at);
    report
}

fn batch(
    time: Timestamp,
    connections: impl IntoIterator<Item = ConnectionReport>,
) -> ConnectionBatch {
    ConnectionBatch {
        time,
        connections: connections.into_iter().collect(),
    }
}

fn indicator(src: Entity, dst: Entity, dst_port: u16) -> FlowIndicator {
    FlowIndicator {
        src,
        dst,
        dst_port,
        protocol: Protocol::Tcp,
    }
}
