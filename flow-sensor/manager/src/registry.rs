use crate::{HostLedger, Metrics};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Maps collector hostnames to their ledgers.
///
/// Cloning the registry produces another handle to the same set of ledgers.
#[derive(Clone, Debug)]
pub struct HostRegistry {
    hosts: Arc<Mutex<HashMap<String, Arc<HostLedger>>>>,
    grace_period: Duration,
    metrics: Metrics,
}

// === impl HostRegistry ===

impl HostRegistry {
    pub fn new(grace_period: Duration, metrics: Metrics) -> Self {
        Self {
            hosts: Default::default(),
            grace_period,
            metrics,
        }
    }

    /// Starts a new collector session for `hostname`.
    ///
    /// Returns the host's ledger, creating it if necessary, and the session's sequence number. Any
    /// deletion scheduled by a prior session's disconnect is canceled.
    pub fn register_collector(&self, hostname: &str) -> (Arc<HostLedger>, u64) {
        loop {
            let ledger = {
                let mut hosts = self.hosts.lock();
                let ledger = hosts
                    .entry(hostname.to_string())
                    .or_insert_with(|| Arc::new(HostLedger::new(hostname)))
                    .clone();
                self.metrics.set_hosts(hosts.len());
                ledger
            };

            if let Some(sequence) = ledger.register() {
                debug!(%hostname, sequence, "Registered collector");
                return (ledger, sequence);
            }

            // The ledger was retired by a deletion that has not unlinked it yet. Unlink it here so
            // that the next attempt creates a fresh ledger.
            self.unlink(hostname, &ledger);
        }
    }

    /// Ends the collector session `sequence` for `hostname`.
    ///
    /// If no newer session has been registered, the host's ledger is deleted once the grace period
    /// elapses without a new registration.
    pub fn unregister_collector(&self, hostname: &str, sequence: u64) {
        let ledger = match self.get(hostname) {
            Some(ledger) => ledger,
            None => return,
        };

        let registry = self.clone();
        let host = hostname.to_string();
        let grace_period = self.grace_period;
        let scheduled = ledger.schedule_deletion(sequence, move || {
            tokio::spawn(async move {
                tokio::time::sleep(grace_period).await;
                registry.delete_if_pending(&host, sequence);
            })
        });

        if scheduled {
            debug!(%hostname, sequence, ?grace_period, "Scheduled ledger deletion");
        } else {
            debug!(%hostname, sequence, "Ignoring unregistration of a superseded session");
        }
    }

    pub fn get(&self, hostname: &str) -> Option<Arc<HostLedger>> {
        self.hosts.lock().get(hostname).cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out references to all ledgers without locking any of them.
    pub(crate) fn snapshot(&self) -> Vec<Arc<HostLedger>> {
        self.hosts.lock().values().cloned().collect()
    }

    fn delete_if_pending(&self, hostname: &str, sequence: u64) {
        let ledger = match self.get(hostname) {
            Some(ledger) => ledger,
            None => return,
        };

        if ledger.retire_if_pending(sequence) {
            self.unlink(hostname, &ledger);
            info!(%hostname, connections = ledger.len(), "Deleted ledger of departed collector");
        }
    }

    /// Removes `ledger` from the map if it is still the ledger registered for `hostname`.
    fn unlink(&self, hostname: &str, ledger: &Arc<HostLedger>) {
        let mut hosts = self.hosts.lock();
        if hosts
            .get(hostname)
            .is_some_and(|current| Arc::ptr_eq(current, ledger))
        {
            hosts.remove(hostname);
        }
        self.metrics.set_hosts(hosts.len());
    }
}
