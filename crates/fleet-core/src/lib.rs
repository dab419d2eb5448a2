//! fleet-core: Shared asset model, audit events, configuration, and error
//! handling for the Fleet inventory.
//!
//! This crate provides the foundational types used across all Fleet components:
//! - Observations produced by the probe pipeline
//! - Asset records with per-field provenance, owned by the merge engine
//! - Identity conflicts held for manual review
//! - Audit events recording every merge decision
//! - Configuration loading and the error taxonomy

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::FleetError;
pub use events::{AuditEvent, AuditPayload, FieldDelta, MergeRule};
pub use types::{
    fields, AssetId, AssetRecord, AssetStatus, Classification, CollectionStatus, ConflictId, ConflictStatus,
    DeviceType, FieldChange, FieldKind, FieldValue, IdentityConflict, IdentityTier, Observation,
    ObservationDraft, ObservationId, OsFamily, PipelineStage, SourceStamp, SourceTrust,
};
