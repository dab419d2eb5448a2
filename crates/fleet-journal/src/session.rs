//! Builder-pattern session recorder for scan journals.
//!
//! ```no_run
//! # use fleet_journal::session::JournalSession;
//! # use uuid::Uuid;
//! let mut session = JournalSession::new(Uuid::new_v4(), "fleet-discover", "Scan 10.0.1.0/24");
//! session.set_context(serde_json::json!({"targets": 254}));
//! session.reject_input("target '10.0.1.300'", "not an IP address, CIDR, or range");
//! session.record("merged", "10.0.1.7", "Merged into existing asset", serde_json::json!({}), true);
//! let journal = session.finalize();
//! assert!(journal.content_hash.is_some());
//! ```

use chrono::Utc;
use uuid::Uuid;

use crate::{JournalEntry, JournalId, RejectedInput, ScanJournal};

/// Records a batch incrementally; [`finalize`](Self::finalize) seals it.
pub struct JournalSession {
    journal: ScanJournal,
}

impl JournalSession {
    pub fn new(batch_id: Uuid, scanner: &str, purpose: &str) -> Self {
        Self {
            journal: ScanJournal {
                id: JournalId::new(),
                batch_id,
                scanner: scanner.to_string(),
                purpose: purpose.to_string(),
                context: serde_json::Value::Null,
                rejected: Vec::new(),
                entries: Vec::new(),
                started_at: Utc::now(),
                completed_at: None,
                content_hash: None,
            },
        }
    }

    pub fn set_context(&mut self, context: serde_json::Value) {
        self.journal.context = context;
    }

    /// Record an input entry rejected before the scan started.
    pub fn reject_input(&mut self, entry: &str, reason: &str) {
        self.journal.rejected.push(RejectedInput {
            entry: entry.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Record an outcome.
    pub fn record(
        &mut self,
        kind: &str,
        target: &str,
        description: &str,
        details: serde_json::Value,
        success: bool,
    ) {
        self.journal.entries.push(JournalEntry {
            kind: kind.to_string(),
            target: target.to_string(),
            description: description.to_string(),
            details,
            success,
            timestamp: Utc::now(),
        });
    }

    pub fn id(&self) -> JournalId {
        self.journal.id
    }

    /// Set completed_at and compute the content hash.
    pub fn finalize(mut self) -> ScanJournal {
        self.journal.completed_at = Some(Utc::now());
        let hash = self.journal.compute_hash();
        self.journal.content_hash = Some(hash);
        self.journal
    }
}
