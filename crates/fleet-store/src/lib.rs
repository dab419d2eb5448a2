//! Fleet Store: persistence for asset records, conflicts, and the audit log.
//!
//! The merge engine is the only writer. External consumers (dashboards,
//! reporting) read through the same trait or query the backing store
//! directly; reads never block writers beyond the backend's own isolation.

pub mod client;
pub mod file;
pub mod graph;
pub mod memory;

use std::net::IpAddr;

use async_trait::async_trait;
use fleet_core::{AssetRecord, AuditEvent, IdentityConflict};

pub use client::{GraphClient, GraphConfig, GraphError};
pub use file::FileAssetStore;
pub use graph::GraphAssetStore;
pub use memory::MemoryAssetStore;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence backend for asset records.
///
/// Implementations do not serialize merges themselves; the merge engine
/// guarantees at most one in-flight write per fingerprint.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Insert or replace a record, re-indexing its fingerprint, aliases,
    /// and address.
    async fn upsert(&self, record: &AssetRecord) -> Result<()>;

    /// Find the record whose primary fingerprint is `fingerprint`, falling
    /// back to a record that carries it as an alias.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AssetRecord>>;

    /// All records carrying `key` as an alias.
    async fn find_by_alias(&self, key: &str) -> Result<Vec<AssetRecord>>;

    /// The most recently observed record last seen at `address`.
    async fn find_by_address(&self, address: IpAddr) -> Result<Option<AssetRecord>>;

    /// Append a merge decision to the audit log.
    async fn append_audit(&self, event: &AuditEvent) -> Result<()>;

    /// Persist an identity conflict for review.
    async fn record_conflict(&self, conflict: &IdentityConflict) -> Result<()>;

    async fn list_assets(&self) -> Result<Vec<AssetRecord>>;

    async fn list_conflicts(&self) -> Result<Vec<IdentityConflict>>;
}
