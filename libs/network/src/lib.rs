//! Network Infrastructure
//!
//! Everything in the telemetry relay that touches a socket:
//! - Delivery endpoints ([`transports`]) and the [`ClientPool`] that picks one per send
//! - The destination [`Blacklist`] checked before any sink dial
//! - Ingestion stages ([`ingest`]): UDP reader, signature verifier,
//!   unmarshaller pool and the secure stream listener
//! - TLS configuration builders ([`tls`])
//! - Named [`Counters`] shared by every component

pub mod blacklist;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pool;
pub mod test_utils;
pub mod tls;
pub mod transports;

pub use blacklist::Blacklist;
pub use error::{BlacklistError, BlacklistViolation, PoolError, Result, TransportError};
pub use ingest::{NetworkReader, SignatureVerifier, TlsListener, UnmarshallerPool};
pub use metrics::Counters;
pub use pool::ClientPool;
pub use transports::{Client, DopplerClient, Scheme, TlsClient, UdpClient};
