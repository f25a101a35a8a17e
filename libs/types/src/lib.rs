//! # Telemetry Types
//!
//! Shared data model for the telemetry transport: the [`Envelope`] that
//! carries one log line, metric or container metric from an emitting agent
//! through the aggregation tier to per-application destinations.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → codec/ → network/ → message_sink/
//!     ↑          ↓          ↓           ↓
//! Envelope   Marshal,   Clients,    Sinks, fan-out,
//! EventType  sign,      listeners   caches
//!            frame
//! ```
//!
//! This crate has no I/O and no async code.

pub mod envelope;
pub mod event_type;

pub use envelope::{
    ContainerMetric, CounterEvent, Envelope, EnvelopeError, ErrorEvent, HttpStartStop, LogMessage,
    MessageType, Payload, ValueMetric,
};
pub use event_type::{lower_first, EventType};
