//! Fleet Journal: tamper-evident record of scan batches.
//!
//! A journal captures one batch end to end: what was asked for, which inputs
//! were rejected before the scan started, and what happened to every target.
//! Each journal is content-hashed with BLAKE3 when finalized so later edits
//! are detectable, and stored as JSON in a date-partitioned directory tree.

pub mod hash;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a journal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JournalId(pub Uuid);

impl JournalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JournalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JournalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An input entry rejected before the scan started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedInput {
    /// The offending entry, with secrets already redacted.
    pub entry: String,
    pub reason: String,
}

/// What happened to one target (or the batch as a whole).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    /// Outcome kind (e.g. "created", "merged", "offline", "conflict").
    pub kind: String,
    /// Target address, empty for batch-level entries.
    pub target: String,
    pub description: String,
    pub details: serde_json::Value,
    /// Whether the target reached a clean outcome.
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// The complete record of one scan batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanJournal {
    pub id: JournalId,
    /// Batch this journal describes.
    pub batch_id: Uuid,
    /// Which scanner instance ran the batch.
    pub scanner: String,
    pub purpose: String,
    /// Configuration snapshot and request summary.
    pub context: serde_json::Value,
    pub rejected: Vec<RejectedInput>,
    pub entries: Vec<JournalEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// BLAKE3 content hash (hex), set on finalization.
    pub content_hash: Option<String>,
}

impl ScanJournal {
    /// Compute the BLAKE3 hash over every field except `content_hash`.
    pub fn compute_hash(&self) -> String {
        hash::compute_journal_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }

    /// Number of entries that did not reach a clean outcome.
    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.success).count()
    }
}
