//! # Doppler
//!
//! The aggregation tier. Agents send envelopes here over signed UDP or
//! length-prefixed TLS; each envelope is verified, decoded and fanned out to
//! the drains and live streams of its application.

pub mod server;

pub use server::Doppler;
