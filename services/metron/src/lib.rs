//! # Metron
//!
//! The telemetry agent running next to emitting processes. It reads
//! marshalled envelopes from a local UDP port and forwards each one to a
//! randomly chosen aggregator (doppler), signed for datagram transport or
//! length-prefixed for stream transport.

pub mod agent;
pub mod forwarder;

pub use agent::Agent;
pub use forwarder::{marshalled_counter, Forwarder, Outcome};
