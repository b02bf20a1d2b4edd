//! Resolved, central-facing flows.

use crate::{Protocol, Timestamp, INFINITE_FUTURE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical network participant.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Entity {
    /// A workload, by stable id.
    Deployment(String),

    /// A cluster node, by name.
    Node(String),

    /// Anything outside of the cluster.
    Internet,
}

/// The resolved identity of a flow between two entities.
///
/// Ordering is by source, then destination, port, and protocol.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowIndicator {
    pub src: Entity,
    pub dst: Entity,
    pub dst_port: u16,
    pub protocol: Protocol,
}

/// A flow record sent upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFlow {
    pub src_entity: Entity,
    pub dst_entity: Entity,
    pub dst_port: u16,
    pub protocol: Protocol,

    /// Set only for flows that have closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Timestamp>,
}

/// A set of flow changes captured at `time`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowUpdate {
    pub time: Timestamp,
    pub flows: Vec<NetworkFlow>,
}

// === impl Entity ===

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment(id) => write!(f, "deployment:{id}"),
            Self::Node(name) => write!(f, "node:{name}"),
            Self::Internet => "internet".fmt(f),
        }
    }
}

// === impl FlowIndicator ===

impl FlowIndicator {
    pub fn into_flow(self, last_seen: Timestamp) -> NetworkFlow {
        let Self {
            src,
            dst,
            dst_port,
            protocol,
        } = self;
        NetworkFlow {
            src_entity: src,
            dst_entity: dst,
            dst_port,
            protocol,
            last_seen: (last_seen != INFINITE_FUTURE).then_some(last_seen),
        }
    }
}

impl fmt::Display for FlowIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}/{:?}",
            self.src, self.dst, self.dst_port, self.protocol
        )
    }
}
