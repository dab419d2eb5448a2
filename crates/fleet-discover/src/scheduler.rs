//! Scan scheduling engine.
//!
//! Spawns one tokio task per configured target group, each running periodic
//! batches at the group's interval. All groups share one [`BatchRunner`] and
//! therefore one worker pool.

use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::batch::BatchRunner;
use crate::config::{DiscoverConfig, ScanSchedule};
use crate::error::{DiscoverError, Result};
use crate::request::{CredentialSets, ScanRequest};

/// The scheduler manages periodic batches for multiple target groups.
pub struct ScanScheduler {
    schedules: Vec<ScanSchedule>,
    runner: Arc<BatchRunner>,
    credentials: CredentialSets,
}

impl ScanScheduler {
    pub fn new(config: &DiscoverConfig, runner: Arc<BatchRunner>) -> Result<Self> {
        let credentials = match &config.credentials_file {
            Some(path) => load_credentials(path)?,
            None => {
                tracing::warn!("No credentials file configured; collectors will not run");
                CredentialSets::default()
            }
        };
        Ok(Self {
            schedules: config.schedules.clone(),
            runner,
            credentials,
        })
    }

    /// Run the scheduler, spawning a tokio task per target group.
    /// Blocks until all tasks complete or the runtime shuts down.
    pub async fn run(&self) -> Result<()> {
        let mut handles = Vec::new();

        for schedule in &self.schedules {
            if !schedule.enabled {
                tracing::info!(group = %schedule.label(), "Target group disabled, skipping");
                continue;
            }

            let runner = self.runner.clone();
            let schedule = schedule.clone();
            let request = ScanRequest::new(schedule.targets.iter().cloned())
                .with_credentials(self.credentials.clone());

            let handle = tokio::spawn(async move {
                run_group_loop(runner, schedule, request).await;
            });
            handles.push(handle);
        }

        if handles.is_empty() {
            return Err(DiscoverError::Config(
                "no enabled schedules in discover.schedules".into(),
            ));
        }
        tracing::info!(group_count = handles.len(), "Scheduler started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Target group task panicked");
            }
        }

        Ok(())
    }
}

/// Per-group batch loop.
async fn run_group_loop(runner: Arc<BatchRunner>, schedule: ScanSchedule, request: ScanRequest) {
    let label = schedule.label();
    let mut ticker = interval(Duration::from_secs(schedule.interval_secs.max(1)));
    // A batch longer than the interval delays the next one instead of
    // queueing a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tracing::info!(group = %label, "Scheduled batch triggered");

        let report = runner.run(&label, &request).await;
        if report.needs_attention() > 0 {
            tracing::warn!(
                group = %label,
                batch_id = %report.batch_id,
                rejected = report.rejected.len(),
                needs_attention = report.needs_attention(),
                "Batch raised items for review"
            );
        }
    }
}

/// Read ordered credential sets from a TOML/JSON/YAML file.
pub fn load_credentials(path: &str) -> Result<CredentialSets> {
    let credentials: CredentialSets = fleet_core::config::from_file(path)?;
    tracing::info!(
        path,
        wmi = credentials.wmi.len(),
        ssh = credentials.ssh.len(),
        snmp = credentials.snmp.len(),
        "Credentials loaded"
    );
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_reconcile::{MergePolicy, ReconcileEngine};
    use fleet_store::MemoryAssetStore;

    fn runner() -> Arc<BatchRunner> {
        let config = DiscoverConfig::default();
        let engine = ReconcileEngine::new(Arc::new(MemoryAssetStore::new()), MergePolicy::default());
        Arc::new(BatchRunner::from_config(&config, engine))
    }

    #[test]
    fn credentials_file_is_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(
            &path,
            r#"
[[snmp]]
version = "v2c"
community = "first-community"

[[snmp]]
version = "v2c"
community = "second-community"

[[ssh]]
username = "inventory"
key_path = "/etc/fleet/id_ed25519"
"#,
        )
        .unwrap();

        let creds = load_credentials(path.to_str().unwrap()).unwrap();
        assert_eq!(creds.snmp.len(), 2);
        assert_eq!(creds.ssh.len(), 1);
        assert!(creds.wmi.is_empty());
    }

    #[test]
    fn missing_credentials_file_is_an_error() {
        let err = load_credentials("/nonexistent/fleet-credentials.toml");
        assert!(matches!(err, Err(DiscoverError::Config(_))));
    }

    #[tokio::test]
    async fn no_enabled_schedule_is_an_error() {
        let config = DiscoverConfig {
            schedules: vec![ScanSchedule {
                targets: vec!["10.0.1.0/30".into()],
                name: Some("lab".into()),
                interval_secs: 60,
                enabled: false,
            }],
            ..DiscoverConfig::default()
        };
        let scheduler = ScanScheduler::new(&config, runner()).unwrap();
        assert!(scheduler.run().await.is_err());
    }
}
