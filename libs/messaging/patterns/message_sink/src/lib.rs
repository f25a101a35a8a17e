//! Message Sinks
//!
//! The delivery half of the aggregator. Envelopes routed here fan out to
//! per-application sinks, each with its own bounded buffer and delivery task:
//!
//! ```text
//! MessageRouter ──► SinkManager::send_to ──┬─► Sink ──► SyslogDrain (syslog / syslog-tls / https)
//!                     │                     └─► Sink ──► StreamDestination (live tail)
//!                     └─► RecentLogs, ContainerMetricCache
//! ```
//!
//! A slow destination only ever loses its own envelopes: enqueueing is
//! non-blocking and drops on a full buffer.

pub mod caches;
pub mod destination;
pub mod error;
pub mod manager;
pub mod registry;
pub mod routing;
pub mod sink;
pub mod test_utils;
pub mod writer;

pub use caches::{ContainerMetricCache, RecentLogs};
pub use destination::{priority_for, Destination, SinkKind, StreamDestination, SyslogDrain};
pub use error::SinkError;
pub use manager::{SinkManager, SinkManagerConfig, DRAIN_ERROR_SOURCE_TYPE};
pub use registry::{registry_channels, AppDestination, DrainBindings, RegistryEvents, RegistryStreams};
pub use routing::MessageRouter;
pub use sink::{BackoffConfig, Enqueue, Sink, SinkKey, SinkState, SinkStats};
pub use writer::{parse_drain_url, SyslogWriter, WriterSettings};
