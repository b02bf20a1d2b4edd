//! Wire transports for the flow sensor.
//!
//! Both directions use newline-delimited JSON over TCP:
//!
//! - [`collector`] accepts sessions from node collectors, which register a hostname and then
//!   stream batches of connection updates into the host's ledger.
//! - [`central`] forwards flow updates to the central service.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod central;
pub mod collector;

#[cfg(test)]
mod tests;

pub use self::collector::{CollectorMessage, ProtocolError};
