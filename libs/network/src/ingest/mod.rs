//! Ingestion stages
//!
//! ```text
//! NetworkReader (UDP) ─► SignatureVerifier ─► UnmarshallerPool ─┐
//!                                                                ├─► Arc<Envelope>
//! TlsListener (length-prefixed, unsigned) ───────────────────────┘
//! ```
//!
//! Each stage owns its output sender and drops it on return, so closing the
//! first queue drains and stops everything downstream.

pub mod tls_listener;
pub mod udp_listener;
pub mod unmarshaller;
pub mod verifier;

pub use tls_listener::TlsListener;
pub use udp_listener::{NetworkReader, MAX_DATAGRAM_SIZE};
pub use unmarshaller::UnmarshallerPool;
pub use verifier::SignatureVerifier;
