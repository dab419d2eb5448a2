//! Configuration for the fleet-discover scanner.

use std::sync::Arc;

use serde::Deserialize;

use fleet_reconcile::MergePolicy;
use fleet_store::{
    AssetStore, FileAssetStore, GraphAssetStore, GraphClient, GraphConfig, MemoryAssetStore,
};

use crate::error::{DiscoverError, Result};

/// Top-level discover configuration.
///
/// Loaded from the `fleet.toml` `[discover]` section or
/// `FLEET_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Maximum number of target pipelines in flight across all batches.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-port timeout for the liveness check.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Per-port timeout for the port scan of live targets.
    #[serde(default = "default_port_timeout_ms")]
    pub port_timeout_ms: u64,

    /// Concurrent connection attempts per target during the port scan.
    #[serde(default = "default_port_scan_concurrency")]
    pub port_scan_concurrency: usize,

    /// Ports checked on live targets.
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<u16>,

    /// Ports tried by the TCP liveness check. A refused connection counts
    /// as alive.
    #[serde(default = "default_liveness_ports")]
    pub liveness_ports: Vec<u16>,

    /// Try an ICMP echo (via the system `ping`) before the TCP liveness check.
    #[serde(default = "default_true")]
    pub icmp: bool,

    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    /// Run nmap OS detection on live targets.
    #[serde(default)]
    pub os_fingerprint: bool,

    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    #[serde(default = "default_fingerprint_timeout")]
    pub fingerprint_timeout_secs: u64,

    /// Upper bound on one collector call (one credential attempt).
    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,

    /// Credentials tried per protocol before giving up.
    #[serde(default = "default_max_credential_attempts")]
    pub max_credential_attempts: usize,

    /// Wall-clock budget of one batch.
    #[serde(default = "default_batch_deadline")]
    pub batch_deadline_secs: u64,

    /// Route unknown-family targets by their open ports.
    #[serde(default = "default_true")]
    pub infer_family_from_ports: bool,

    /// Cap on the number of addresses one batch may expand to.
    #[serde(default = "default_max_targets")]
    pub max_targets_per_batch: usize,

    /// Directory for batch journals. Journals are skipped when empty.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,

    /// Credentials file used by scheduled scans.
    #[serde(default)]
    pub credentials_file: Option<String>,

    #[serde(default)]
    pub tools: ToolPaths,

    /// Recurring scans run by the daemon.
    #[serde(default)]
    pub schedules: Vec<ScanSchedule>,
}

/// External programs the collectors shell out to.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_wmic_path")]
    pub wmic: String,
    #[serde(default = "default_ssh_path")]
    pub ssh: String,
    #[serde(default = "default_sshpass_path")]
    pub sshpass: String,
    #[serde(default = "default_snmpget_path")]
    pub snmpget: String,
}

/// A target set with its scan schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanSchedule {
    /// Addresses, CIDR blocks, or dash ranges.
    pub targets: Vec<String>,

    /// Human-readable name for this schedule.
    pub name: Option<String>,

    /// Scan interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this schedule is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ScanSchedule {
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.targets.join(","))
    }
}

/// Which backend holds asset records.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile; useful for one-off scans.
    Memory,
    #[default]
    File,
    Neo4j,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory of the file backend.
    #[serde(default = "default_store_path")]
    pub path: String,

    #[serde(default)]
    pub neo4j: GraphConfig,
}

impl StoreConfig {
    /// Open the configured backend.
    pub async fn open(&self) -> Result<Arc<dyn AssetStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryAssetStore::new())),
            StoreBackend::File => Ok(Arc::new(FileAssetStore::open(&self.path).await?)),
            StoreBackend::Neo4j => {
                let client = GraphClient::connect(&self.neo4j)
                    .await
                    .map_err(fleet_store::StoreError::from)?;
                let store = GraphAssetStore::new(client);
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            neo4j: GraphConfig::default(),
        }
    }
}

/// Everything the binary reads from the layered config.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub discover: DiscoverConfig,
    pub store: StoreConfig,
    pub reconcile: MergePolicy,
}

impl Settings {
    /// Load `[discover]`, `[store]` and `[reconcile]` from `{prefix}.toml`
    /// and `FLEET_*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = fleet_core::config::load(file_prefix)?;
        let settings = Self {
            discover: fleet_core::config::section(&cfg, "discover")?,
            store: fleet_core::config::section(&cfg, "store")?,
            reconcile: fleet_core::config::section(&cfg, "reconcile")?,
        };
        settings.discover.validate()?;
        Ok(settings)
    }
}

impl DiscoverConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DiscoverError::Config("discover.workers must be at least 1".into()));
        }
        if self.port_scan_concurrency == 0 {
            return Err(DiscoverError::Config(
                "discover.port_scan_concurrency must be at least 1".into(),
            ));
        }
        if self.liveness_ports.is_empty() && !self.icmp {
            return Err(DiscoverError::Config(
                "discover.liveness_ports is empty and icmp is disabled".into(),
            ));
        }
        if self.max_credential_attempts == 0 {
            return Err(DiscoverError::Config(
                "discover.max_credential_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    32
}

fn default_liveness_timeout_ms() -> u64 {
    1000
}

fn default_port_timeout_ms() -> u64 {
    500
}

fn default_port_scan_concurrency() -> usize {
    16
}

fn default_candidate_ports() -> Vec<u16> {
    vec![
        21, 22, 23, 25, 53, 80, 88, 110, 135, 139, 143, 161, 389, 443, 445, 515, 631, 636, 993,
        1433, 1521, 3268, 3306, 3389, 5432, 5900, 5985, 6379, 8080, 8443, 9100, 27017,
    ]
}

fn default_liveness_ports() -> Vec<u16> {
    vec![80, 443, 22, 445, 135, 3389, 139]
}

fn default_ping_path() -> String {
    "ping".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_fingerprint_timeout() -> u64 {
    60
}

fn default_collector_timeout() -> u64 {
    30
}

fn default_max_credential_attempts() -> usize {
    5
}

fn default_batch_deadline() -> u64 {
    1800
}

fn default_max_targets() -> usize {
    4096
}

fn default_journal_dir() -> String {
    "./journals".to_string()
}

fn default_store_path() -> String {
    "./fleet-data".to_string()
}

fn default_wmic_path() -> String {
    "wmic".to_string()
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_sshpass_path() -> String {
    "sshpass".to_string()
}

fn default_snmpget_path() -> String {
    "snmpget".to_string()
}

fn default_interval() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            wmic: default_wmic_path(),
            ssh: default_ssh_path(),
            sshpass: default_sshpass_path(),
            snmpget: default_snmpget_path(),
        }
    }
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            port_timeout_ms: default_port_timeout_ms(),
            port_scan_concurrency: default_port_scan_concurrency(),
            candidate_ports: default_candidate_ports(),
            liveness_ports: default_liveness_ports(),
            icmp: true,
            ping_path: default_ping_path(),
            os_fingerprint: false,
            nmap_path: default_nmap_path(),
            fingerprint_timeout_secs: default_fingerprint_timeout(),
            collector_timeout_secs: default_collector_timeout(),
            max_credential_attempts: default_max_credential_attempts(),
            batch_deadline_secs: default_batch_deadline(),
            infer_family_from_ports: true,
            max_targets_per_batch: default_max_targets(),
            journal_dir: default_journal_dir(),
            credentials_file: None,
            tools: ToolPaths::default(),
            schedules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoverConfig::default();
        assert_eq!(config.workers, 32);
        assert_eq!(config.max_credential_attempts, 5);
        assert!(config.candidate_ports.contains(&3389));
        assert!(!config.os_fingerprint);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_section_overrides() {
        let cfg = config::Config::builder()
            .set_override("discover.workers", 4)
            .unwrap()
            .set_override("discover.liveness_ports", vec![22i64, 80])
            .unwrap()
            .set_override("store.backend", "memory")
            .unwrap()
            .build()
            .unwrap();

        let discover: DiscoverConfig = fleet_core::config::section(&cfg, "discover").unwrap();
        assert_eq!(discover.workers, 4);
        assert_eq!(discover.liveness_ports, vec![22, 80]);
        assert_eq!(discover.collector_timeout_secs, 30);

        let store: StoreConfig = fleet_core::config::section(&cfg, "store").unwrap();
        assert_eq!(store.backend, StoreBackend::Memory);
        assert_eq!(store.path, "./fleet-data");
    }

    #[test]
    fn test_schedule_defaults() {
        let schedule: ScanSchedule =
            serde_json::from_str(r#"{"targets": ["10.0.1.0/24"]}"#).unwrap();
        assert_eq!(schedule.interval_secs, 3600);
        assert!(schedule.enabled);
        assert_eq!(schedule.label(), "10.0.1.0/24");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = DiscoverConfig {
            workers: 0,
            ..DiscoverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_opens() {
        let store = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        }
        .open()
        .await
        .unwrap();
        assert!(store.list_assets().await.unwrap().is_empty());
    }
}
