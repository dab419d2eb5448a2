//! Configuration loading shared by Fleet binaries.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`FLEET_` prefix, `__` as the nesting separator)
//! 2. Config file (`fleet.toml` by default; any format the `config` crate reads)
//! 3. Defaults

use serde::de::DeserializeOwned;

use crate::error::FleetError;

/// Default config file prefix.
pub const DEFAULT_FILE_PREFIX: &str = "fleet";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLEET";

/// Build the layered configuration source.
pub fn load(file_prefix: &str) -> Result<config::Config, FleetError> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| FleetError::Config(e.to_string()))
}

/// Deserialize one section, falling back to its defaults when absent.
pub fn section<T>(cfg: &config::Config, name: &str) -> Result<T, FleetError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(name) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section = name, "Config section absent, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(FleetError::Config(format!("[{name}]: {e}"))),
    }
}

/// Load a standalone file (e.g. a credentials file) into a typed value.
pub fn from_file<T: DeserializeOwned>(path: &str) -> Result<T, FleetError> {
    config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| FleetError::Config(format!("{path}: {e}")))
}
