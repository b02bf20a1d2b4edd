//! Network flow manager
//!
//! The manager turns raw, per-host connection reports from node collectors into a minimal, ordered
//! stream of logical flow updates:
//!
//! - Each collector host has a [`HostLedger`] that holds the raw connections the collector has
//!   reported. Ledgers are fenced by sequence numbers so that batches from a superseded collector
//!   session are rejected and so that a reconnect presumes unconfirmed connections closed.
//! - The [`HostRegistry`] maps hostnames to ledgers. When a collector disconnects its ledger is
//!   kept for a grace period so that brief reconnects don't lose state.
//! - On every cycle the [`FlowManager`] resolves each ledger's connections into flow indicators
//!   against the cluster's entities, diffs the result against what was last sent, and publishes
//!   the changes.
//!
//! ```text
//! [ collector ] -> [ HostLedger ] -> enrich -> diff -> [ FlowUpdate ]
//! ```
//!
//! Locking is two-level: the registry's map is locked only to look up or (un)link ledgers, and
//! each ledger is locked independently. The registry lock is always released before a ledger lock
//! is taken.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod delta;
mod driver;
mod enrich;
mod ledger;
pub mod metrics;
mod registry;

#[cfg(test)]
mod tests;

pub use self::{
    driver::{FlowManager, SinkClosed},
    ledger::{HostLedger, Superseded},
    metrics::Metrics,
    registry::HostRegistry,
};
use ahash::AHashMap as HashMap;
use flow_sensor_core::{FlowIndicator, Timestamp};
use std::time::Duration;

/// The most recent timestamp of each resolved flow.
type FlowMap = HashMap<FlowIndicator, Timestamp>;

/// Timing parameters of the flow manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// How often flow updates are computed and sent.
    pub cycle_interval: Duration,

    /// How long an unresolvable connection is presumed to be waiting on cluster state rather than
    /// talking to the internet.
    pub freshness_window: Duration,

    /// How long a disconnected collector's ledger is retained for a reconnect.
    pub deletion_grace_period: Duration,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(30),
            freshness_window: Duration::from_secs(10),
            deletion_grace_period: Duration::from_secs(5 * 60),
        }
    }
}
