use thiserror::Error;

use crate::types::PipelineStage;

/// Error taxonomy for the Fleet inventory.
///
/// Only [`SchemaValidation`](FleetError::SchemaValidation) and
/// [`IdentityConflict`](FleetError::IdentityConflict) need outside attention;
/// everything else degrades the pipeline and heals on the next scan cycle.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The target answered nothing within the liveness timeout and is
    /// recorded offline.
    #[error("Probe timed out: {target} did not answer within the deadline")]
    ProbeTimeout { target: String },

    /// The batch deadline stopped the pipeline before `stage` finished.
    /// Nothing is concluded about the target's status.
    #[error("Cancelled: batch deadline reached during {stage} of {target}")]
    Cancelled { target: String, stage: PipelineStage },

    #[error("Authentication failed: {protocol} on {target} rejected all {attempts} credential(s)")]
    AuthenticationFailed {
        protocol: String,
        target: String,
        attempts: usize,
    },

    #[error("Partial collection: {protocol} on {target} returned no {missing:?}")]
    PartialCollection {
        protocol: String,
        target: String,
        missing: Vec<String>,
    },

    #[error("Collection failed: {protocol} on {target}: {reason}")]
    CollectionFailed {
        protocol: String,
        target: String,
        reason: String,
    },

    #[error("Identity conflict on {fingerprint}: {reason}")]
    IdentityConflict { fingerprint: String, reason: String },

    #[error("Invalid {entry}: {reason}")]
    SchemaValidation { entry: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Whether the error is surfaced for external attention rather than
    /// self-healing on the next scan cycle.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            Self::SchemaValidation { .. } | Self::IdentityConflict { .. }
        )
    }

    pub fn validation(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}
