//! Journal helpers for scan batches.

use fleet_journal::session::JournalSession;
use fleet_journal::store::{FileJournalStore, JournalStore};
use fleet_journal::ScanJournal;
use fleet_reconcile::Outcome;

use crate::batch::{BatchReport, TargetReport};
use crate::config::DiscoverConfig;

const SCANNER: &str = "fleet-discover";

/// The parts of the configuration that explain a batch's results.
pub fn config_snapshot(config: &DiscoverConfig) -> serde_json::Value {
    serde_json::json!({
        "workers": config.workers,
        "batch_deadline_secs": config.batch_deadline_secs,
        "candidate_ports": config.candidate_ports,
        "liveness_ports": config.liveness_ports,
        "icmp": config.icmp,
        "os_fingerprint": config.os_fingerprint,
        "collector_timeout_secs": config.collector_timeout_secs,
        "max_credential_attempts": config.max_credential_attempts,
        "infer_family_from_ports": config.infer_family_from_ports,
    })
}

/// Create a journal session for a finished batch.
pub fn start_batch_session(report: &BatchReport, config: serde_json::Value) -> JournalSession {
    let mut session = JournalSession::new(
        report.batch_id,
        SCANNER,
        &format!("Inventory scan '{}'", report.label),
    );
    session.set_context(serde_json::json!({
        "label": report.label,
        "targets": report.requested,
        "config": config,
    }));
    session
}

/// Record rejected inputs, every target outcome, and targets never started.
pub fn record_batch(session: &mut JournalSession, report: &BatchReport) {
    for r in &report.rejected {
        session.reject_input(&r.entry, &r.reason);
    }
    for t in &report.targets {
        record_target(session, t);
    }
    for ip in &report.not_started {
        session.record(
            "not_started",
            &ip.to_string(),
            "Batch deadline reached before a worker was free",
            serde_json::Value::Null,
            false,
        );
    }
}

fn record_target(session: &mut JournalSession, t: &TargetReport) {
    let description = match &t.outcome {
        Some(Outcome::Created(id)) => format!("Created asset {id}"),
        Some(Outcome::Merged(id)) => format!("Merged into asset {id}"),
        Some(Outcome::Confirmed(id)) => format!("Confirmed asset {id} unchanged"),
        Some(Outcome::Replayed(id)) => format!("Observation already merged into {id}"),
        Some(Outcome::MarkedOffline(id)) => format!("Asset {id} marked offline"),
        Some(Outcome::Unmatched) => "Unreachable, no known asset at this address".to_string(),
        Some(Outcome::Incomplete) => "Cancelled before reachability was known".to_string(),
        Some(Outcome::Conflict(c)) => format!("Identity conflict held for review: {}", c.reason),
        None => "No outcome reached".to_string(),
    };
    let success = t.errors.is_empty()
        && !matches!(
            t.outcome,
            None | Some(Outcome::Conflict(_)) | Some(Outcome::Incomplete)
        );
    session.record(
        t.label(),
        &t.target.to_string(),
        &description,
        serde_json::to_value(t).unwrap_or_default(),
        success,
    );
}

/// Finalize the session and store the journal.
pub fn finalize_and_store(session: JournalSession, journal_dir: &str) -> Option<ScanJournal> {
    let journal = session.finalize();

    match FileJournalStore::new(journal_dir) {
        Ok(store) => match store.save(&journal) {
            Ok(()) => {
                tracing::info!(
                    journal_id = %journal.id,
                    failures = journal.failure_count(),
                    "Journal recorded for batch"
                );
                Some(journal)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to store journal");
                Some(journal)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to initialize journal store");
            Some(journal)
        }
    }
}
