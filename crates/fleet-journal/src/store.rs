//! Journal storage: trait + file-system implementation.
//!
//! Journals are stored as JSON files organized by date and journal ID.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{JournalId, ScanJournal};

/// Errors that can occur during journal storage operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalStoreError {
    #[error("Journal not found: {0}")]
    NotFound(JournalId),

    #[error("Integrity check failed for journal {0}: stored hash does not match content")]
    IntegrityViolation(JournalId),

    #[error("Journal has no content hash (not finalized)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query parameters for listing journals.
#[derive(Debug, Default)]
pub struct JournalQuery {
    pub scanner: Option<String>,
    /// Only include journals started at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include journals started at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Only include journals with at least one failed entry.
    pub failures_only: bool,
}

/// Trait for journal persistence backends.
pub trait JournalStore {
    /// Store a finalized journal. Rejects journals without a content hash.
    fn save(&self, journal: &ScanJournal) -> Result<(), JournalStoreError>;

    /// Retrieve a journal by ID, verifying integrity.
    fn get(&self, id: JournalId) -> Result<ScanJournal, JournalStoreError>;

    /// List journals matching the query, newest first.
    fn list(&self, query: &JournalQuery) -> Result<Vec<ScanJournal>, JournalStoreError>;
}

/// File-system backed journal store.
///
/// ```text
/// {root}/
///   2026/
///     10/
///       18/
///         {journal_id}.json
/// ```
pub struct FileJournalStore {
    root: PathBuf,
}

impl FileJournalStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JournalStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn journal_path(&self, journal: &ScanJournal) -> PathBuf {
        let date = journal.started_at.format("%Y/%m/%d");
        self.root.join(format!("{}/{}.json", date, journal.id.0))
    }

    fn find_path(&self, id: JournalId) -> Result<PathBuf, JournalStoreError> {
        let filename = format!("{}.json", id.0);
        find_file_recursive(&self.root, &filename).ok_or(JournalStoreError::NotFound(id))
    }
}

impl JournalStore for FileJournalStore {
    fn save(&self, journal: &ScanJournal) -> Result<(), JournalStoreError> {
        if journal.content_hash.is_none() {
            return Err(JournalStoreError::NotFinalized);
        }

        let path = self.journal_path(journal);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(journal)?;
        fs::write(&path, json)?;

        tracing::debug!(
            journal_id = %journal.id,
            path = %path.display(),
            "Journal saved"
        );

        Ok(())
    }

    fn get(&self, id: JournalId) -> Result<ScanJournal, JournalStoreError> {
        let path = self.find_path(id)?;
        let json = fs::read_to_string(&path)?;
        let journal: ScanJournal = serde_json::from_str(&json)?;

        if !journal.verify_integrity() {
            return Err(JournalStoreError::IntegrityViolation(id));
        }

        Ok(journal)
    }

    fn list(&self, query: &JournalQuery) -> Result<Vec<ScanJournal>, JournalStoreError> {
        let mut results = Vec::new();
        collect_journals_recursive(&self.root, query, &mut results)?;
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(results)
    }
}

fn find_file_recursive(dir: &Path, filename: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }

    None
}

fn collect_journals_recursive(
    dir: &Path,
    query: &JournalQuery,
    results: &mut Vec<ScanJournal>,
) -> Result<(), JournalStoreError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_journals_recursive(&path, query, results)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let json = fs::read_to_string(&path)?;
            let journal: ScanJournal = serde_json::from_str(&json)?;

            if matches_query(&journal, query) {
                results.push(journal);
            }
        }
    }

    Ok(())
}

fn matches_query(journal: &ScanJournal, query: &JournalQuery) -> bool {
    if let Some(scanner) = &query.scanner {
        if &journal.scanner != scanner {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &journal.started_at < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &journal.started_at > to {
            return false;
        }
    }
    if query.failures_only && journal.failure_count() == 0 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::JournalSession;
    use uuid::Uuid;

    fn create_test_journal(scanner: &str, failed: bool) -> ScanJournal {
        let mut session = JournalSession::new(Uuid::new_v4(), scanner, "Scan 10.0.1.0/30");
        session.set_context(serde_json::json!({"targets": 2}));
        session.reject_input("target 'bogus'", "not an IP address, CIDR, or range");
        session.record(
            "created",
            "10.0.1.1",
            "New asset",
            serde_json::json!({"fingerprint": "mac:aa:bb:cc:dd:ee:01"}),
            true,
        );
        session.record(
            "conflict",
            "10.0.1.2",
            "Identity conflict held for review",
            serde_json::json!({}),
            !failed,
        );
        session.finalize()
    }

    #[test]
    fn save_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path()).unwrap();
        let journal = create_test_journal("scanner-a", false);
        let id = journal.id;

        store.save(&journal).unwrap();
        let retrieved = store.get(id).unwrap();

        assert_eq!(retrieved.id, id);
        assert_eq!(retrieved.rejected.len(), 1);
        assert_eq!(retrieved.entries.len(), 2);
        assert!(retrieved.verify_integrity());
    }

    #[test]
    fn integrity_violation_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path()).unwrap();
        let journal = create_test_journal("scanner-a", false);
        let id = journal.id;
        store.save(&journal).unwrap();

        // Rewrite an outcome after the fact.
        let path = store.find_path(id).unwrap();
        let mut tampered: ScanJournal =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        tampered.entries[1].kind = "merged".to_string();
        fs::write(&path, serde_json::to_string_pretty(&tampered).unwrap()).unwrap();

        let result = store.get(id);
        assert!(matches!(result, Err(JournalStoreError::IntegrityViolation(_))));
    }

    #[test]
    fn save_rejects_unfinalized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path()).unwrap();

        let journal = ScanJournal {
            id: JournalId::new(),
            batch_id: Uuid::new_v4(),
            scanner: "test".to_string(),
            purpose: "test".to_string(),
            context: serde_json::Value::Null,
            rejected: vec![],
            entries: vec![],
            started_at: Utc::now(),
            completed_at: None,
            content_hash: None,
        };

        let result = store.save(&journal);
        assert!(matches!(result, Err(JournalStoreError::NotFinalized)));
    }

    #[test]
    fn list_filters_by_scanner_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path()).unwrap();

        store.save(&create_test_journal("scanner-a", false)).unwrap();
        store.save(&create_test_journal("scanner-b", true)).unwrap();
        store.save(&create_test_journal("scanner-a", true)).unwrap();

        let by_scanner = store
            .list(&JournalQuery {
                scanner: Some("scanner-a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_scanner.len(), 2);
        assert!(by_scanner.iter().all(|j| j.scanner == "scanner-a"));

        let failing = store
            .list(&JournalQuery {
                failures_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failing.len(), 2);
        assert!(failing.iter().all(|j| j.failure_count() == 1));
    }
}
