use crate::{ledger::ConnectionStatus, FlowMap, HostLedger};
use chrono::TimeDelta;
use flow_sensor_core::{
    Connection, EndpointMatch, Entity, FlowIndicator, ResolveEntities, Timestamp,
};
use std::{collections::hash_map::Entry, time::Duration};
use tracing::trace;

/// Resolves raw connections into flow indicators as of a single point in time.
pub(crate) struct Enricher<'r, R> {
    resolver: &'r R,
    now: Timestamp,
    freshness_window: TimeDelta,
}

// === impl Enricher ===

impl<'r, R: ResolveEntities> Enricher<'r, R> {
    pub(crate) fn new(resolver: &'r R, now: Timestamp, freshness_window: Duration) -> Self {
        Self {
            resolver,
            now,
            freshness_window: TimeDelta::from_std(freshness_window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Enriches every connection in `ledger` into `flows`, dropping connections that are closed
    /// and used. Returns the number of connections left in the ledger.
    pub(crate) fn enrich_ledger(&self, ledger: &HostLedger, flows: &mut FlowMap) -> usize {
        ledger.enrich_and_clean(|conn, status| self.enrich(conn, status, flows))
    }

    pub(crate) fn enrich(
        &self,
        conn: &Connection,
        status: &mut ConnectionStatus,
        flows: &mut FlowMap,
    ) {
        if !status.used {
            let fresh = self.now.signed_duration_since(status.first_seen) < self.freshness_window;
            let indicators = self.resolve(conn, fresh);
            if fresh {
                for indicator in indicators {
                    record(flows, indicator, status.last_seen);
                }
                return;
            }

            // Past the freshness window the outcome is final, whether or not the connection
            // resolved.
            status.used = true;
            status.flows = indicators;
        }

        for indicator in &status.flows {
            record(flows, indicator.clone(), status.last_seen);
        }
    }

    /// Resolves a connection into the flows it represents. Returns no flows if the connection
    /// can't be (or shouldn't be) reported.
    fn resolve(&self, conn: &Connection, fresh: bool) -> Vec<FlowIndicator> {
        let deployment = match self.resolver.resolve_container(&conn.container_id) {
            Some(id) => Entity::Deployment(id),
            None => {
                trace!(container = %conn.container_id, "Unknown container");
                return Vec::new();
            }
        };

        let incoming = conn.is_incoming();
        let mut matches = self.resolver.resolve_endpoint(&conn.remote);
        if matches.is_empty() {
            if fresh {
                trace!(remote = %conn.remote.addr, "Waiting for the remote endpoint to resolve");
                return Vec::new();
            }
            matches.push(EndpointMatch {
                entity: Entity::Internet,
                ports: vec![conn.observed_port()],
            });
        } else if incoming {
            // The cluster-internal client reports the same flow as an outgoing connection.
            return Vec::new();
        }

        let protocol = conn.remote.protocol;
        matches
            .into_iter()
            .flat_map(|EndpointMatch { entity, ports }| {
                let deployment = deployment.clone();
                ports.into_iter().map(move |dst_port| {
                    let (src, dst) = if incoming {
                        (entity.clone(), deployment.clone())
                    } else {
                        (deployment.clone(), entity.clone())
                    };
                    FlowIndicator {
                        src,
                        dst,
                        dst_port,
                        protocol,
                    }
                })
            })
            .collect()
    }
}

/// Records a flow, keeping the latest timestamp of all connections that resolve to it.
fn record(flows: &mut FlowMap, indicator: FlowIndicator, last_seen: Timestamp) {
    match flows.entry(indicator) {
        Entry::Occupied(mut entry) => {
            if *entry.get() < last_seen {
                entry.insert(last_seen);
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(last_seen);
        }
    }
}
