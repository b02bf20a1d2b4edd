use crate::{delta, enrich::Enricher, Config, FlowMap, HostRegistry, Metrics};
use chrono::Utc;
use flow_sensor_core::{FlowUpdate, ResolveEntities, Timestamp};
use tokio::{sync::mpsc, time};
use tracing::{debug, info};

/// Indicates that the consumer of flow updates has gone away.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("flow update stream closed")]
pub struct SinkClosed(());

/// Periodically turns the registered hosts' connections into flow updates.
#[derive(Debug)]
pub struct FlowManager<R> {
    registry: HostRegistry,
    resolver: R,
    config: Config,
    metrics: Metrics,
}

// === impl FlowManager ===

impl<R> FlowManager<R>
where
    R: ResolveEntities,
{
    pub fn new(resolver: R, config: Config, metrics: Metrics) -> Self {
        Self {
            registry: HostRegistry::new(config.deletion_grace_period, metrics.clone()),
            resolver,
            config,
            metrics,
        }
    }

    /// Returns a handle through which collector sessions register and unregister.
    pub fn registry(&self) -> HostRegistry {
        self.registry.clone()
    }

    /// Sends flow updates on `updates` every cycle interval until `shutdown` is signaled.
    ///
    /// Fails as soon as the update receiver is dropped, even while there is nothing to send.
    pub async fn run(
        self,
        updates: mpsc::Sender<FlowUpdate>,
        shutdown: drain::Watch,
    ) -> Result<(), SinkClosed> {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        let mut interval = time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        info!(interval = ?self.config.cycle_interval, "Sending flow updates");

        // Flows as of the last cycle. Only this task reads or writes it.
        let mut last_sent = FlowMap::default();
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = updates.closed() => return Err(SinkClosed(())),
                _ = &mut shutdown => {
                    debug!("Shutting down");
                    return Ok(());
                }
            }

            let update = match self.cycle(&mut last_sent, Utc::now()) {
                Some(update) => update,
                None => continue,
            };

            let flows = update.flows.len();
            tokio::select! {
                res = updates.send(update) => {
                    if res.is_err() {
                        return Err(SinkClosed(()));
                    }
                    debug!(flows, "Sent flow update");
                    self.metrics.record_update(flows);
                }
                _ = &mut shutdown => {
                    debug!("Shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Enriches all ledgers as of `now` and diffs the result against `last_sent`, which is replaced
    /// with the new state. Returns `None` if nothing changed.
    pub(crate) fn cycle(&self, last_sent: &mut FlowMap, now: Timestamp) -> Option<FlowUpdate> {
        let current = self.enrich(now);
        let flows = delta::compose(&current, last_sent);
        *last_sent = current;

        if flows.is_empty() {
            return None;
        }
        Some(FlowUpdate { time: now, flows })
    }

    fn enrich(&self, now: Timestamp) -> FlowMap {
        let enricher = Enricher::new(&self.resolver, now, self.config.freshness_window);
        let mut flows = FlowMap::default();
        let mut connections = 0;
        for ledger in self.registry.snapshot() {
            connections += enricher.enrich_ledger(&ledger, &mut flows);
        }
        self.metrics.set_connections(connections);
        flows
    }
}
