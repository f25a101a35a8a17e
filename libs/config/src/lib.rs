//! # Relay Configuration
//!
//! Configuration surfaces for the agent (metron) and aggregator (doppler)
//! services. Files are JSON or TOML; any setting can be overridden with a
//! prefixed environment variable (`METRON_`, `DOPPLER_`).
//!
//! ```rust,no_run
//! use relay_config::{load_from_file, DopplerConfig};
//! use std::path::Path;
//!
//! let config: DopplerConfig =
//!     load_from_file(Path::new("doppler.json"), "DOPPLER").unwrap();
//! println!("sink buffer: {}", config.message_drain_buffer_size);
//! ```

pub mod doppler;
pub mod error;
pub mod ip_range;
pub mod loader;
pub mod metron;

pub use doppler::{DopplerConfig, StaticDrain, TlsListenerConfig};
pub use error::ConfigError;
pub use ip_range::{parse_ranges, IpRange, ParsedIpRange};
pub use loader::{load_from_file, load_from_str, Validate};
pub use metron::{MetronConfig, TlsClientConfig};

pub use config_crate::FileFormat;
