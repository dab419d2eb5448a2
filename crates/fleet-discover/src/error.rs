//! Errors raised by the scanner outside the per-target taxonomy.
//!
//! Per-target failures are [`fleet_core::FleetError`] values carried in the
//! batch report; these errors stop a command before or instead of a batch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("nmap not runnable at '{path}'")]
    NmapNotFound { path: String },

    #[error("nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("unreadable nmap XML: {0}")]
    XmlParse(String),

    #[error("asset store: {0}")]
    Store(#[from] fleet_store::StoreError),

    #[error("configuration: {0}")]
    Config(String),
}

impl From<fleet_core::FleetError> for DiscoverError {
    fn from(e: fleet_core::FleetError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
