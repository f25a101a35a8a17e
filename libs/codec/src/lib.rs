//! # Telemetry Codec
//!
//! Wire rules shared by the agent and aggregator tiers:
//! - Envelope marshalling ([`marshal`], [`unmarshal`])
//! - Shared-secret message signing for datagram transport ([`signature`])
//! - Length-prefixed frames for persistent stream transport ([`frame`])
//! - RFC5424 syslog lines for external drains ([`syslog`])
//!
//! ## What This Crate Does NOT Contain
//! - Sockets, connections or retry logic (belongs in `network/`)
//! - Sink bookkeeping (belongs in `message_sink/`)

pub mod error;
pub mod frame;
pub mod marshal;
pub mod signature;
pub mod syslog;

pub use error::{CodecError, Result};
pub use frame::{
    decode_frame, encode_frame, length_prefix, read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
pub use marshal::{marshal, unmarshal};
pub use signature::{sign, verify, Signer, SIGNATURE_LENGTH};
pub use syslog::{format_source, format_syslog, format_timestamp, PRIORITY_ERROR, PRIORITY_INFO};
