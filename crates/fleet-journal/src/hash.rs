//! BLAKE3 content hashing for tamper evidence.

use serde::Serialize;

use crate::ScanJournal;

/// Hashable view of a journal (excludes content_hash).
#[derive(Serialize)]
struct HashableJournal<'a> {
    id: &'a crate::JournalId,
    batch_id: &'a uuid::Uuid,
    scanner: &'a str,
    purpose: &'a str,
    context: &'a serde_json::Value,
    rejected: &'a [crate::RejectedInput],
    entries: &'a [crate::JournalEntry],
    started_at: &'a chrono::DateTime<chrono::Utc>,
    completed_at: &'a Option<chrono::DateTime<chrono::Utc>>,
}

/// Compute the hex-encoded BLAKE3 hash of a journal's canonical JSON.
pub fn compute_journal_hash(journal: &ScanJournal) -> String {
    let hashable = HashableJournal {
        id: &journal.id,
        batch_id: &journal.batch_id,
        scanner: &journal.scanner,
        purpose: &journal.purpose,
        context: &journal.context,
        rejected: &journal.rejected,
        entries: &journal.entries,
        started_at: &journal.started_at,
        completed_at: &journal.completed_at,
    };

    let mut hasher = blake3::Hasher::new();
    // Plain data: serialization into a Vec cannot fail.
    if let Ok(json) = serde_json::to_vec(&hashable) {
        hasher.update(&json);
    }
    hasher.finalize().to_hex().to_string()
}
