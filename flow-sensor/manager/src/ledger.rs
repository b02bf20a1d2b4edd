use ahash::AHashMap as HashMap;
use flow_sensor_core::{Connection, ConnectionBatch, FlowIndicator, Timestamp, INFINITE_FUTURE};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Indicates that a batch was tagged with a collector session that has since been replaced.
///
/// The session that produced the batch is obsolete and should stop forwarding data.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("collector session {sequence} for {hostname} was superseded by session {active}")]
pub struct Superseded {
    pub hostname: String,
    pub sequence: u64,
    pub active: u64,
}

/// Holds the raw connections reported by a single host's collector.
#[derive(Debug)]
pub struct HostLedger {
    hostname: String,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    connections: HashMap<Connection, ConnectionStatus>,

    /// The local time at which the last batch was processed.
    last_known: Timestamp,

    /// The collector session whose data is reflected in `connections`.
    committed_sequence: u64,

    /// The most recently registered collector session.
    active_sequence: u64,

    pending_deletion: Option<PendingDeletion>,

    /// Set once the ledger has been deleted; it can no longer be registered or updated.
    retired: bool,
}

#[derive(Debug)]
struct PendingDeletion {
    sequence: u64,
    task: JoinHandle<()>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ConnectionStatus {
    pub(crate) first_seen: Timestamp,

    /// Either `INFINITE_FUTURE` for open connections or the time at which the connection closed.
    pub(crate) last_seen: Timestamp,

    /// Set once the connection has been consumed past its freshness window. Used connections are
    /// never resolved again and are dropped once closed.
    pub(crate) used: bool,

    /// The flows a used connection resolved to.
    pub(crate) flows: Vec<FlowIndicator>,
}

// === impl HostLedger ===

impl HostLedger {
    pub(crate) fn new(hostname: impl ToString) -> Self {
        Self {
            hostname: hostname.to_string(),
            state: Mutex::new(State {
                connections: HashMap::default(),
                last_known: Timestamp::MIN_UTC,
                committed_sequence: 0,
                active_sequence: 0,
                pending_deletion: None,
                retired: false,
            }),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The number of connections currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new collector session, canceling any pending deletion of the ledger.
    ///
    /// Returns `None` if the ledger has already been deleted.
    pub(crate) fn register(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }

        if let Some(PendingDeletion { sequence, task }) = state.pending_deletion.take() {
            task.abort();
            debug!(hostname = %self.hostname, sequence, "Canceled pending deletion");
        }

        state.active_sequence += 1;
        Some(state.active_sequence)
    }

    /// Records a deletion task for the ledger if `sequence` is still the active session.
    ///
    /// The task is spawned while the ledger is locked so that it cannot observe the ledger before
    /// it has been recorded.
    pub(crate) fn schedule_deletion(
        &self,
        sequence: u64,
        spawn: impl FnOnce() -> JoinHandle<()>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.retired || state.active_sequence != sequence {
            return false;
        }

        let task = spawn();
        if let Some(prior) = state.pending_deletion.replace(PendingDeletion { sequence, task }) {
            prior.task.abort();
        }
        true
    }

    /// Retires the ledger if the deletion scheduled for `sequence` is still pending.
    pub(crate) fn retire_if_pending(&self, sequence: u64) -> bool {
        let mut state = self.state.lock();
        let pending = state
            .pending_deletion
            .as_ref()
            .is_some_and(|pending| pending.sequence == sequence);
        if pending {
            state.pending_deletion = None;
            state.retired = true;
        }
        pending
    }

    /// Merges a batch of connection updates reported by the collector session `sequence`.
    ///
    /// `now` is the local time at which the batch was received. The difference between `now` and
    /// the batch's capture time is applied to reported close times to correct for clock skew
    /// between the host and the sensor.
    pub fn process(
        &self,
        batch: &ConnectionBatch,
        now: Timestamp,
        sequence: u64,
    ) -> Result<(), Superseded> {
        let mut state = self.state.lock();
        if state.retired || sequence != state.active_sequence {
            return Err(Superseded {
                hostname: self.hostname.clone(),
                sequence,
                active: state.active_sequence,
            });
        }

        // The first batch of a new session: the collector restarted, so anything it doesn't
        // report again is presumed to have closed when we last heard from the host.
        if sequence != state.committed_sequence {
            let closed_at = state.last_known;
            let mut closed = 0usize;
            for status in state.connections.values_mut() {
                if status.last_seen == INFINITE_FUTURE {
                    status.last_seen = closed_at;
                    closed += 1;
                }
            }
            debug!(hostname = %self.hostname, sequence, closed, "Committed new collector session");
            state.committed_sequence = sequence;
        }

        let offset = now.signed_duration_since(batch.time);
        for report in &batch.connections {
            let last_seen = match report.close_timestamp {
                Some(closed) => closed.checked_add_signed(offset).unwrap_or(closed),
                None => INFINITE_FUTURE,
            };
            match state.connections.entry(Connection::from(report)) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().last_seen = last_seen;
                }
                Entry::Vacant(entry) => {
                    entry.insert(ConnectionStatus {
                        first_seen: now.min(last_seen),
                        last_seen,
                        used: false,
                        flows: Vec::new(),
                    });
                }
            }
        }
        state.last_known = now;

        trace!(
            hostname = %self.hostname,
            reported = batch.connections.len(),
            tracked = state.connections.len(),
            "Processed batch"
        );
        Ok(())
    }

    /// Visits every connection and then drops those that are closed and already used.
    ///
    /// Returns the number of connections that remain.
    pub(crate) fn enrich_and_clean(
        &self,
        mut enrich: impl FnMut(&Connection, &mut ConnectionStatus),
    ) -> usize {
        let mut state = self.state.lock();
        state.connections.retain(|conn, status| {
            enrich(conn, status);
            !(status.used && status.last_seen != INFINITE_FUTURE)
        });
        state.connections.len()
    }

    #[cfg(test)]
    pub(crate) fn status(&self, conn: &Connection) -> Option<ConnectionStatus> {
        self.state.lock().connections.get(conn).cloned()
    }

    #[cfg(test)]
    pub(crate) fn sequences(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.committed_sequence, state.active_sequence)
    }

    #[cfg(test)]
    pub(crate) fn has_pending_deletion(&self) -> bool {
        self.state.lock().pending_deletion.is_some()
    }
}
