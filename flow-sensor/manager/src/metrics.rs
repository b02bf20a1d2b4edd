use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Flow manager metrics.
///
/// The default value is a set of unregistered metrics.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    hosts: Gauge,
    connections: Gauge,
    updates: Counter,
    flows: Counter,
    superseded_batches: Counter,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "hosts",
            "Gauge of the number of collector hosts with a ledger",
            metrics.hosts.clone(),
        );
        prom.register(
            "connections",
            "Gauge of the number of raw connections tracked across all hosts",
            metrics.connections.clone(),
        );
        prom.register("updates", "Count of flow update messages sent", metrics.updates.clone());
        prom.register("flows", "Count of flow records sent", metrics.flows.clone());
        prom.register(
            "superseded_batches",
            "Count of collector batches rejected because their session was superseded",
            metrics.superseded_batches.clone(),
        );
        metrics
    }

    pub fn inc_superseded(&self) {
        self.superseded_batches.inc();
    }

    pub(crate) fn set_hosts(&self, hosts: usize) {
        self.hosts.set(hosts as i64);
    }

    pub(crate) fn set_connections(&self, connections: usize) {
        self.connections.set(connections as i64);
    }

    pub(crate) fn record_update(&self, flows: usize) {
        self.updates.inc();
        self.flows.inc_by(flows as u64);
    }
}
