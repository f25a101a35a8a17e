//! Configuration loading
//!
//! A service configuration is read from one file (format picked from the
//! extension, JSON or TOML), then overridden by environment variables with a
//! service prefix, e.g. `DOPPLER_SINK_IO_TIMEOUT_SECONDS=5`. Nested tables use
//! a double underscore: `DOPPLER_TLS_LISTENER__PORT=8766`.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, info};

/// A configuration type that can be checked after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), crate::ConfigError>;
}

/// Load, override from environment, and validate a configuration file
pub fn load_from_file<T>(path: &Path, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    info!("Loading configuration from {:?}", path);

    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration file {:?}", path))?;

    finish(config)
}

/// Load and validate a configuration held in memory
pub fn load_from_str<T>(content: &str, format: FileFormat) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let config = Config::builder()
        .add_source(File::from_str(content, format))
        .build()
        .context("Failed to parse configuration")?;

    finish(config)
}

fn finish<T>(config: Config) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let parsed: T = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    parsed.validate().context("Invalid configuration")?;
    debug!("Configuration validated");
    Ok(parsed)
}
