//! Raw connections as reported by node collectors.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// The number of leading characters of a container id that collectors report.
pub const CONTAINER_ID_LEN: usize = 12;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// The role of the reporting container in a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Server,
}

/// A remote address together with its transport protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub protocol: Protocol,
}

/// Identifies a connection as reported by a single collector.
///
/// Two connections are the same connection iff every field is equal; this is the key under which
/// a host's ledger deduplicates reports.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    pub local: SocketAddr,
    pub remote: Endpoint,
    pub container_id: String,

    /// Whether the connection was accepted by the reporting container.
    pub incoming: bool,
}

/// A single connection record in a collector batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub local_address: SocketAddr,
    pub remote_address: SocketAddr,
    pub protocol: Protocol,
    pub role: Role,
    pub container_id: String,

    /// Set when the collector observed the connection closing, in the collector's clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_timestamp: Option<Timestamp>,
}

/// A batch of updated and closed connections captured by a collector at `time`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionBatch {
    pub time: Timestamp,
    #[serde(default)]
    pub connections: Vec<ConnectionReport>,
}

/// Strips a container runtime scheme (e.g. `containerd://`) and truncates the id to the length
/// collectors report.
pub fn normalize_container_id(id: &str) -> &str {
    let id = id.split_once("://").map(|(_, id)| id).unwrap_or(id);
    match id.char_indices().nth(CONTAINER_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Scores how likely `port` is to be an ephemeral (client-side) port. Higher is more likely.
pub fn ephemeral_port_score(port: u16) -> u8 {
    match port {
        0..=1024 => 0,
        // Legacy BSD and Windows range.
        1025..=5000 => 2,
        5001..=32767 => 1,
        // Linux default `ip_local_port_range`, below the IANA range.
        32768..=49151 => 3,
        // IANA dynamic range.
        49152.. => 4,
    }
}

// === impl Connection ===

impl Connection {
    /// Indicates whether the reporting container is the server side of this connection.
    ///
    /// Collectors cannot reliably tell client from server for UDP, so for UDP the side whose port
    /// looks more like an ephemeral port is taken to be the client. The reported role is kept when
    /// both ports score the same.
    pub fn is_incoming(&self) -> bool {
        if self.remote.protocol != Protocol::Udp {
            return self.incoming;
        }

        let local = ephemeral_port_score(self.local.port());
        let remote = ephemeral_port_score(self.remote.addr.port());
        if local == remote {
            return self.incoming;
        }
        remote > local
    }

    /// The port of the connection that is visible on the reporting container's side of the
    /// flow: the local port for incoming connections and the remote port otherwise.
    pub fn observed_port(&self) -> u16 {
        if self.is_incoming() {
            self.local.port()
        } else {
            self.remote.addr.port()
        }
    }
}

impl From<&ConnectionReport> for Connection {
    fn from(report: &ConnectionReport) -> Self {
        Self {
            local: report.local_address,
            remote: Endpoint {
                addr: report.remote_address,
                protocol: report.protocol,
            },
            container_id: normalize_container_id(&report.container_id).to_string(),
            incoming: report.role == Role::Server,
        }
    }
}
