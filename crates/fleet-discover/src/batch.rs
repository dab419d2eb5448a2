//! Batch execution over a bounded worker pool.
//!
//! Every target runs end to end (pipeline, then reconcile) while holding one
//! permit of a shared semaphore, so the pool bounds work across every batch
//! sharing the runner. Repeated submissions of one address run in a single
//! task, in submission order; distinct addresses run in parallel.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use fleet_core::{CollectionStatus, DeviceType, FleetError, PipelineStage};
use fleet_journal::JournalId;
use fleet_reconcile::{Outcome, ReconcileEngine};

use crate::config::DiscoverConfig;
use crate::journal;
use crate::pipeline::{Pipeline, PipelineRun};
use crate::request::{CredentialSets, ScanRequest};

/// An input entry rejected before the batch started.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedEntry {
    pub entry: String,
    pub reason: String,
}

impl From<FleetError> for RejectedEntry {
    fn from(e: FleetError) -> Self {
        match e {
            FleetError::SchemaValidation { entry, reason } => Self { entry, reason },
            other => Self {
                entry: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// What happened to one submitted target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: IpAddr,
    pub reachable: bool,
    pub device_type: Option<DeviceType>,
    pub confidence: Option<f64>,
    pub collector: Option<String>,
    pub collection: CollectionStatus,
    pub interrupted_at: Option<PipelineStage>,
    /// `None` when no outcome was reached; see `errors`.
    pub outcome: Option<Outcome>,
    pub errors: Vec<String>,
}

impl TargetReport {
    fn new(run: PipelineRun, reconciled: fleet_reconcile::Result<Outcome>) -> Self {
        let obs = run.observation;
        let mut errors: Vec<String> = run.errors.iter().map(ToString::to_string).collect();
        let outcome = match reconciled {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(target = %obs.target, error = %e, "Reconcile failed");
                errors.push(e.to_string());
                None
            }
        };
        Self {
            target: obs.target,
            reachable: obs.reachable,
            device_type: obs.classification.as_ref().map(|c| c.device_type),
            confidence: obs.classification.as_ref().map(|c| c.confidence),
            collector: obs.collector,
            collection: obs.status,
            interrupted_at: obs.interrupted_at,
            outcome,
            errors,
        }
    }

    /// A target whose worker task died before reporting.
    fn lost(target: IpAddr) -> Self {
        Self {
            target,
            reachable: false,
            device_type: None,
            confidence: None,
            collector: None,
            collection: CollectionStatus::NotAttempted,
            interrupted_at: None,
            outcome: None,
            errors: vec![FleetError::Internal("worker task panicked before reporting".into())
                .to_string()],
        }
    }

    /// Short outcome name, or `failed` when no outcome was reached.
    pub fn label(&self) -> &'static str {
        self.outcome.as_ref().map_or("failed", Outcome::label)
    }
}

/// The result of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Addresses accepted after validation.
    pub requested: usize,
    pub rejected: Vec<RejectedEntry>,
    /// Per target, in submission order.
    pub targets: Vec<TargetReport>,
    /// Targets the deadline reached before a worker picked them up.
    pub not_started: Vec<IpAddr>,
    pub deadline_hit: bool,
    pub journal_id: Option<JournalId>,
}

impl BatchReport {
    /// Outcome counts by label.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for t in &self.targets {
            *counts.entry(t.label()).or_insert(0) += 1;
        }
        counts
    }

    /// Rejected inputs plus raised identity conflicts.
    pub fn needs_attention(&self) -> usize {
        let conflicts = self
            .targets
            .iter()
            .filter(|t| matches!(t.outcome, Some(Outcome::Conflict(_))))
            .count();
        self.rejected.len() + conflicts
    }
}

enum Slot {
    Done(TargetReport),
    NotStarted(IpAddr),
}

/// Runs scan batches. Cheap to share behind an `Arc`.
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    engine: Arc<ReconcileEngine>,
    workers: Arc<Semaphore>,
    max_targets: usize,
    batch_deadline: Duration,
    journal_dir: Option<String>,
    /// Configuration snapshot written into journals.
    context: serde_json::Value,
}

impl BatchRunner {
    pub fn new(pipeline: Pipeline, engine: ReconcileEngine, workers: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            engine: Arc::new(engine),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            max_targets: usize::MAX,
            batch_deadline: Duration::from_secs(1800),
            journal_dir: None,
            context: serde_json::Value::Null,
        }
    }

    pub fn from_config(config: &DiscoverConfig, engine: ReconcileEngine) -> Self {
        let journal_dir = Some(config.journal_dir.clone()).filter(|d| !d.is_empty());
        let mut runner = Self::new(Pipeline::from_config(config), engine, config.workers)
            .max_targets(config.max_targets_per_batch)
            .batch_deadline(Duration::from_secs(config.batch_deadline_secs));
        runner.journal_dir = journal_dir;
        runner.context = journal::config_snapshot(config);
        runner
    }

    pub fn max_targets(mut self, max_targets: usize) -> Self {
        self.max_targets = max_targets;
        self
    }

    pub fn batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = deadline;
        self
    }

    pub fn journal_dir(mut self, dir: impl Into<String>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    pub fn engine(&self) -> &ReconcileEngine {
        &self.engine
    }

    /// Run one batch with the configured deadline.
    pub async fn run(&self, label: &str, request: &ScanRequest) -> BatchReport {
        self.run_until(label, request, Instant::now() + self.batch_deadline)
            .await
    }

    /// Run one batch that stops at `deadline`.
    pub async fn run_until(
        &self,
        label: &str,
        request: &ScanRequest,
        deadline: Instant,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = std::time::Instant::now();

        let (validated, rejected) = request.validate(self.max_targets);
        let rejected: Vec<RejectedEntry> = rejected.into_iter().map(RejectedEntry::from).collect();
        for r in &rejected {
            tracing::warn!(%batch_id, entry = %r.entry, reason = %r.reason, "Input rejected");
        }
        tracing::info!(
            %batch_id,
            label,
            targets = validated.targets.len(),
            rejected = rejected.len(),
            "Batch started"
        );

        let requested = validated.targets.len();
        let credentials = Arc::new(validated.credentials);
        let slots = self
            .dispatch(&validated.targets, credentials, deadline)
            .await;

        let mut targets = Vec::with_capacity(slots.len());
        let mut not_started = Vec::new();
        for slot in slots {
            match slot {
                Slot::Done(report) => targets.push(report),
                Slot::NotStarted(ip) => not_started.push(ip),
            }
        }
        let deadline_hit = !not_started.is_empty()
            || targets.iter().any(|t| t.interrupted_at.is_some());

        let mut report = BatchReport {
            batch_id,
            label: label.to_string(),
            started_at,
            completed_at: Utc::now(),
            requested,
            rejected,
            targets,
            not_started,
            deadline_hit,
            journal_id: None,
        };

        if let Some(dir) = &self.journal_dir {
            let mut session = journal::start_batch_session(&report, self.context.clone());
            journal::record_batch(&mut session, &report);
            report.journal_id = journal::finalize_and_store(session, dir).map(|j| j.id);
        }

        tracing::info!(
            %batch_id,
            label,
            outcomes = ?report.summary(),
            not_started = report.not_started.len(),
            deadline_hit,
            duration_ms = start.elapsed().as_millis(),
            "Batch complete"
        );
        report
    }

    /// Fan targets out to the worker pool and gather results in submission
    /// order.
    async fn dispatch(
        &self,
        targets: &[IpAddr],
        credentials: Arc<CredentialSets>,
        deadline: Instant,
    ) -> Vec<Slot> {
        let mut groups: Vec<(IpAddr, Vec<usize>)> = Vec::new();
        let mut index: BTreeMap<IpAddr, usize> = BTreeMap::new();
        for (position, ip) in targets.iter().enumerate() {
            let group = *index.entry(*ip).or_insert_with(|| {
                groups.push((*ip, Vec::new()));
                groups.len() - 1
            });
            groups[group].1.push(position);
        }

        let mut set = JoinSet::new();
        for (ip, positions) in groups {
            let pipeline = self.pipeline.clone();
            let engine = self.engine.clone();
            let workers = self.workers.clone();
            let credentials = credentials.clone();

            set.spawn(async move {
                let mut done = Vec::with_capacity(positions.len());
                for position in positions {
                    let permit = match timeout_at(deadline, workers.clone().acquire_owned()).await
                    {
                        Ok(Ok(permit)) => permit,
                        _ => {
                            done.push((position, Slot::NotStarted(ip)));
                            continue;
                        }
                    };
                    let run = pipeline.run(ip, &credentials, deadline).await;
                    let reconciled = engine.reconcile(&run.observation).await;
                    drop(permit);
                    done.push((position, Slot::Done(TargetReport::new(run, reconciled))));
                }
                done
            });
        }

        let mut slots: Vec<Option<Slot>> = targets.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => {
                    for (position, slot) in done {
                        slots[position] = Some(slot);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Target task panicked"),
            }
        }
        // Positions of a task that died are reported as failed, never dropped.
        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, ip)| slot.unwrap_or_else(|| Slot::Done(TargetReport::lost(*ip))))
            .collect()
    }
}
