#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod connection;
pub mod flow;
mod resolve;

pub use self::{
    connection::{Connection, ConnectionBatch, ConnectionReport, Endpoint, Protocol, Role},
    flow::{Entity, FlowIndicator, FlowUpdate, NetworkFlow},
    resolve::{EndpointMatch, ResolveEntities},
};

use chrono::{DateTime, Utc};

/// A point in time as observed by the sensor.
pub type Timestamp = DateTime<Utc>;

/// The `last_seen` value of a connection or flow that is still active.
pub const INFINITE_FUTURE: Timestamp = DateTime::<Utc>::MAX_UTC;
