//! Core domain types for the Fleet asset inventory.
//!
//! An [`Observation`] is one probe cycle's findings for one target. The merge
//! engine folds observations into [`AssetRecord`]s keyed by fingerprint; every
//! merged field keeps its provenance so a consumer can see which collector
//! reported which value and when.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────

/// Internal identifier of an asset record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObservationId(pub Uuid);

impl ObservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an identity conflict held for review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Field names ───────────────────────────────────────────────────

/// Canonical field names shared by collectors and the merge engine.
pub mod fields {
    pub const HOSTNAME: &str = "hostname";
    pub const IP_ADDRESS: &str = "ip_address";
    pub const MAC_ADDRESS: &str = "mac_address";
    pub const BIOS_SERIAL: &str = "bios_serial";
    pub const CHASSIS_SERIAL: &str = "chassis_serial";
    pub const DEVICE_SERIAL: &str = "device_serial";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const MODEL: &str = "model";
    pub const OS_FAMILY: &str = "os_family";
    pub const OS_VERSION: &str = "os_version";
    pub const OPEN_PORTS: &str = "open_ports";
    pub const RAM_GB: &str = "ram_gb";
    pub const DISK_TOTAL_GB: &str = "disk_total_gb";
    pub const CPU_CORES: &str = "cpu_cores";
    pub const CPU: &str = "cpu";
    pub const STORAGE: &str = "storage";
    pub const MONITORS: &str = "monitors";
    pub const NETWORK_ADAPTERS: &str = "network_adapters";
    pub const DESCRIPTION: &str = "description";
    pub const LOGGED_IN_USER: &str = "logged_in_user";
    pub const ASSIGNED_USER: &str = "assigned_user";
    pub const LOCATION: &str = "location";
    pub const CONTACT: &str = "contact";

    /// Hardware serial fields in fingerprint priority order.
    pub const SERIALS: [&str; 3] = [BIOS_SERIAL, CHASSIS_SERIAL, DEVICE_SERIAL];

    /// Fields counted by the completeness score.
    pub const CORE_INVENTORY: [&str; 9] = [
        HOSTNAME,
        MAC_ADDRESS,
        MANUFACTURER,
        MODEL,
        OS_VERSION,
        RAM_GB,
        CPU,
        STORAGE,
        LOGGED_IN_USER,
    ];
}

/// How the merge engine treats conflicting values of a field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Serials, manufacturer, model, MAC, hostname. Most recent wins, with history.
    Identity,
    /// Assigned user, location, contact. Most recent wins, with history.
    Ownership,
    /// Numeric hardware specs. Most recent wins unless a higher-trust source set it.
    Hardware,
    /// Enumerable descriptions (storage, CPU, monitors). More complete value wins.
    Descriptive,
    /// Volatile network state. Most recent wins, no history.
    State,
}

impl FieldKind {
    pub fn of(name: &str) -> Self {
        use fields::*;
        match name {
            BIOS_SERIAL | CHASSIS_SERIAL | DEVICE_SERIAL | MANUFACTURER | MODEL | MAC_ADDRESS
            | HOSTNAME => Self::Identity,
            LOGGED_IN_USER | ASSIGNED_USER | LOCATION | CONTACT => Self::Ownership,
            RAM_GB | DISK_TOTAL_GB | CPU_CORES => Self::Hardware,
            IP_ADDRESS | OPEN_PORTS | OS_FAMILY | OS_VERSION => Self::State,
            _ => Self::Descriptive,
        }
    }

    /// Whether value replacements append a change-history entry.
    pub fn keeps_history(self) -> bool {
        matches!(self, Self::Identity | Self::Ownership)
    }
}

/// Trust level of the source that reported a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrust {
    /// Derived from reachability or port-scan results.
    Inferred,
    /// Reported by an OS fingerprinting tool.
    Fingerprinted,
    /// Reported by an authenticated protocol collector.
    Collected,
}

// ── Classification ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Server,
    Workstation,
    NetworkDevice,
    Printer,
    #[default]
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Server => "Server",
            Self::Workstation => "Workstation",
            Self::NetworkDevice => "Network Device",
            Self::Printer => "Printer",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Operating system family, normalized from free-form OS strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Windows,
    Linux,
    /// BSDs, macOS, Solaris, AIX and other non-Linux Unix.
    Unix,
    /// Router, switch, firewall and printer operating systems.
    Embedded,
    #[default]
    Unknown,
}

impl OsFamily {
    /// Normalize a free-form OS string ("Microsoft Windows Server 2019",
    /// "Ubuntu 22.04", "Cisco IOS 15.2") to a family.
    pub fn from_text(text: &str) -> Self {
        let t = text.to_lowercase();
        if t.contains("windows") {
            return Self::Windows;
        }
        const LINUX: [&str; 9] = [
            "linux", "ubuntu", "debian", "centos", "red hat", "rhel", "fedora", "suse", "alpine",
        ];
        if LINUX.iter().any(|k| t.contains(k)) {
            return Self::Linux;
        }
        const UNIX: [&str; 8] = [
            "bsd", "unix", "solaris", "aix", "hp-ux", "darwin", "mac os", "macos",
        ];
        if UNIX.iter().any(|k| t.contains(k)) {
            return Self::Unix;
        }
        const EMBEDDED: [&str; 10] = [
            "ios", "junos", "routeros", "fortios", "pan-os", "nx-os", "eos", "embedded",
            "jetdirect", "procurve",
        ];
        if EMBEDDED
            .iter()
            .any(|k| t.split(|c: char| !c.is_alphanumeric() && c != '-').any(|w| w == *k))
        {
            return Self::Embedded;
        }
        Self::Unknown
    }

    pub fn is_unix_like(self) -> bool {
        matches!(self, Self::Linux | Self::Unix)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::Unix => "Unix",
            Self::Embedded => "Embedded",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Output of the device classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub device_type: DeviceType,
    /// Trust in the decision, in `[0.0, 1.0]`.
    pub confidence: f64,
    pub reasoning: String,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            device_type: DeviceType::Unknown,
            confidence: 0.0,
            reasoning: "no classification signal".to_string(),
        }
    }
}

// ── Observation ───────────────────────────────────────────────────

/// Outcome of the protocol collection stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Success,
    Partial,
    Failed,
    /// Collection never ran (dead target, no credentials, cancelled earlier).
    #[default]
    NotAttempted,
}

/// Stage of the per-target pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Probe,
    Fingerprint,
    Classify,
    Collect,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Probe => "probe",
            Self::Fingerprint => "fingerprint",
            Self::Classify => "classify",
            Self::Collect => "collect",
        };
        f.write_str(label)
    }
}

/// One probe cycle's findings for one target. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: ObservationId,
    pub target: IpAddr,
    pub reachable: bool,
    pub open_ports: BTreeSet<u16>,
    pub os_family: Option<String>,
    pub os_version: Option<String>,
    /// Device-type hint from a fingerprinting tool.
    pub device_type_hint: Option<String>,
    /// Collector-sourced fields (hostname, serials, RAM, ...).
    pub fields: BTreeMap<String, String>,
    pub collector: Option<String>,
    pub status: CollectionStatus,
    pub classification: Option<Classification>,
    /// Set when the batch deadline cut the pipeline short.
    pub interrupted_at: Option<PipelineStage>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn builder(target: IpAddr) -> ObservationDraft {
        ObservationDraft::new(target)
    }

    /// A trimmed, non-empty collector field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Trust level of the collector-sourced fields.
    pub fn collector_trust(&self) -> SourceTrust {
        match (self.collector.is_some(), self.status) {
            (true, CollectionStatus::Success | CollectionStatus::Partial) => SourceTrust::Collected,
            _ => SourceTrust::Inferred,
        }
    }
}

/// Accumulates pipeline results for one target; [`finish`](Self::finish)
/// freezes it into an [`Observation`].
#[derive(Debug, Clone)]
pub struct ObservationDraft {
    inner: Observation,
}

impl ObservationDraft {
    pub fn new(target: IpAddr) -> Self {
        Self {
            inner: Observation {
                id: ObservationId::new(),
                target,
                reachable: false,
                open_ports: BTreeSet::new(),
                os_family: None,
                os_version: None,
                device_type_hint: None,
                fields: BTreeMap::new(),
                collector: None,
                status: CollectionStatus::NotAttempted,
                classification: None,
                interrupted_at: None,
                observed_at: Utc::now(),
            },
        }
    }

    pub fn reachable(mut self, reachable: bool) -> Self {
        self.inner.reachable = reachable;
        self
    }

    pub fn open_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.inner.open_ports.extend(ports);
        self
    }

    pub fn os_family(mut self, family: impl Into<String>) -> Self {
        self.inner.os_family = Some(family.into());
        self
    }

    pub fn os_version(mut self, version: impl Into<String>) -> Self {
        self.inner.os_version = Some(version.into());
        self
    }

    pub fn device_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.inner.device_type_hint = Some(hint.into());
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.inner.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.inner.fields.extend(fields);
        self
    }

    pub fn collector(mut self, name: impl Into<String>, status: CollectionStatus) -> Self {
        self.inner.collector = Some(name.into());
        self.inner.status = status;
        self
    }

    pub fn status(mut self, status: CollectionStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn classification(mut self, classification: Classification) -> Self {
        self.inner.classification = Some(classification);
        self
    }

    pub fn interrupted_at(mut self, stage: PipelineStage) -> Self {
        self.inner.interrupted_at = Some(stage);
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.inner.observed_at = at;
        self
    }

    /// Read access to what has been gathered so far.
    pub fn peek(&self) -> &Observation {
        &self.inner
    }

    pub fn finish(self) -> Observation {
        self.inner
    }
}

// ── Asset record ──────────────────────────────────────────────────

/// Strength of the identity signal behind a fingerprint, weakest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityTier {
    /// IP address only. Breaks on address reassignment.
    Address,
    HostnameAddress,
    Mac,
    Serial,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// One source's report of a field value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceStamp {
    pub source: String,
    pub trust: SourceTrust,
    pub value: String,
    pub observed_at: DateTime<Utc>,
}

/// A recorded replacement of a field value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub previous: String,
    pub current: String,
    pub source: String,
    pub changed_at: DateTime<Utc>,
}

/// A merged field: current value plus provenance and change history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub value: String,
    pub kind: FieldKind,
    pub sources: Vec<SourceStamp>,
    #[serde(default)]
    pub history: Vec<FieldChange>,
}

impl FieldValue {
    /// Latest observation time among sources that reported the current value.
    pub fn current_observed_at(&self) -> Option<DateTime<Utc>> {
        self.sources
            .iter()
            .filter(|s| s.value == self.value)
            .map(|s| s.observed_at)
            .max()
    }

    /// Highest trust among sources that reported the current value.
    pub fn current_trust(&self) -> Option<SourceTrust> {
        self.sources
            .iter()
            .filter(|s| s.value == self.value)
            .map(|s| s.trust)
            .max()
    }
}

/// The canonical, merged representation of one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRecord {
    pub id: AssetId,
    pub fingerprint: String,
    /// Superseded or equivalent fingerprint keys that also resolve here.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    pub identity_tier: IdentityTier,
    pub device_type: DeviceType,
    pub classification_confidence: f64,
    pub classification_reasoning: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub status: AssetStatus,
    pub last_collection: CollectionStatus,
    /// Fraction of core inventory fields present.
    pub completeness: f64,
    pub created_at: DateTime<Utc>,
    pub last_merged_at: DateTime<Utc>,
    /// Newest observation time merged so far.
    pub last_observed_at: DateTime<Utc>,
    pub merge_count: u64,
    /// Ring of recently merged observation ids, oldest first.
    #[serde(default)]
    pub recent_observations: Vec<ObservationId>,
}

impl AssetRecord {
    /// Current value of a merged field.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    /// The address the device was last seen at.
    pub fn address(&self) -> Option<IpAddr> {
        self.value(fields::IP_ADDRESS)?.parse().ok()
    }

    /// Every key this record answers to.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.fingerprint.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

// ── Identity conflicts ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Open,
    Resolved,
}

/// Two observations share a strong identity signal but disagree on every
/// secondary signal. Held for manual review; never merged automatically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConflict {
    pub id: ConflictId,
    pub fingerprint: String,
    pub asset_id: AssetId,
    pub existing_mac: Option<String>,
    pub incoming_mac: Option<String>,
    pub existing_hostname: Option<String>,
    pub incoming_hostname: Option<String>,
    pub existing_observed_at: DateTime<Utc>,
    pub reason: String,
    pub status: ConflictStatus,
    pub raised_at: DateTime<Utc>,
    /// The rejected observation, kept intact for the reviewer.
    pub observation: Observation,
}
