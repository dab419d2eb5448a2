//! The merge function: reconcile one observation against the record that
//! shares its fingerprint, field by field.
//!
//! `merge` is pure. Locking, lookup, and persistence live in
//! [`ReconcileEngine`](crate::ReconcileEngine).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use fleet_core::{
    fields, AssetId, AssetRecord, AssetStatus, AuditEvent, AuditPayload, FieldChange, FieldDelta,
    FieldKind, FieldValue, IdentityConflict, MergeRule, Observation, SourceStamp, SourceTrust,
};

use crate::conflict;
use crate::fingerprint::{self, Fingerprint};

/// Tunables for the merge engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    /// Observations of one serial closer together than this, with both MAC
    /// and hostname different, raise an identity conflict.
    pub conflict_window_secs: i64,
    /// Provenance entries kept per field.
    pub provenance_cap: usize,
    /// Change-history entries kept per field.
    pub history_cap: usize,
    /// Observation ids remembered per record for replay detection.
    pub replay_ring: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            conflict_window_secs: 3600,
            provenance_cap: 16,
            history_cap: 32,
            replay_ring: 32,
        }
    }
}

/// Result of merging one observation.
#[derive(Debug, Clone)]
pub enum Merged {
    Applied {
        record: AssetRecord,
        event: AuditEvent,
    },
    /// Aborted; the record is unchanged and the conflict awaits review.
    Conflict(IdentityConflict),
}

/// One value an observation contributes, tagged with where it came from.
struct Incoming {
    name: String,
    value: String,
    source: String,
    trust: SourceTrust,
}

/// Merge `obs` into `existing`, or seed a new record when there is none.
///
/// `fp` is the observation's fingerprint. When `existing` is present it has
/// already been re-keyed by the caller if the fingerprint promoted it.
pub fn merge(
    existing: Option<&AssetRecord>,
    fp: &Fingerprint,
    obs: &Observation,
    policy: &MergePolicy,
    now: DateTime<Utc>,
) -> Merged {
    match existing {
        None => seed(fp, obs, policy, now),
        Some(record) if record.recent_observations.contains(&obs.id) => {
            let mut record = record.clone();
            record.last_merged_at = now;
            let event = AuditEvent::new(
                record.fingerprint.clone(),
                Some(record.id),
                AuditPayload::ObservationReplayed,
                Some(obs.clone()),
            );
            Merged::Applied { record, event }
        }
        Some(record) => {
            if let Some(conflict) = conflict::detect(record, fp, obs, policy.conflict_window_secs) {
                return Merged::Conflict(conflict);
            }
            update(record.clone(), fp, obs, policy, now)
        }
    }
}

fn seed(fp: &Fingerprint, obs: &Observation, policy: &MergePolicy, now: DateTime<Utc>) -> Merged {
    let classification = obs
        .classification
        .clone()
        .unwrap_or_else(fleet_core::Classification::unknown);

    let mut fields = BTreeMap::new();
    for incoming in contributions(obs) {
        let stamp = stamp(&incoming, obs.observed_at);
        fields.insert(
            incoming.name.clone(),
            FieldValue {
                kind: FieldKind::of(&incoming.name),
                value: incoming.value,
                sources: vec![stamp],
                history: Vec::new(),
            },
        );
    }

    let mut record = AssetRecord {
        id: AssetId::new(),
        fingerprint: fp.key.clone(),
        aliases: BTreeSet::new(),
        identity_tier: fp.tier,
        device_type: classification.device_type,
        classification_confidence: classification.confidence,
        classification_reasoning: classification.reasoning,
        fields,
        status: AssetStatus::Online,
        last_collection: obs.status,
        completeness: 0.0,
        created_at: now,
        last_merged_at: now,
        last_observed_at: obs.observed_at,
        merge_count: 1,
        recent_observations: Vec::new(),
    };
    finish_record(&mut record, fp, obs, policy);

    let event = AuditEvent::new(
        record.fingerprint.clone(),
        Some(record.id),
        AuditPayload::AssetCreated {
            device_type: record.device_type,
            field_count: record.fields.len(),
            source: primary_source(obs),
        },
        Some(obs.clone()),
    );
    Merged::Applied { record, event }
}

fn update(
    mut record: AssetRecord,
    fp: &Fingerprint,
    obs: &Observation,
    policy: &MergePolicy,
    now: DateTime<Utc>,
) -> Merged {
    let mut changes = Vec::new();
    let mut sources = BTreeSet::new();

    for incoming in contributions(obs) {
        sources.insert(incoming.source.clone());
        let observed_at = obs.observed_at;
        match record.fields.get_mut(&incoming.name) {
            None => {
                changes.push(FieldDelta {
                    field: incoming.name.clone(),
                    previous: None,
                    current: incoming.value.clone(),
                    rule: MergeRule::Adopted,
                    source: incoming.source.clone(),
                });
                record.fields.insert(
                    incoming.name.clone(),
                    FieldValue {
                        kind: FieldKind::of(&incoming.name),
                        value: incoming.value.clone(),
                        sources: vec![stamp(&incoming, observed_at)],
                        history: Vec::new(),
                    },
                );
            }
            Some(field) => {
                if let Some(delta) = merge_field(field, &incoming, observed_at, policy) {
                    changes.push(delta);
                }
            }
        }
    }

    let mut classification_changed = false;
    if let Some(classification) = &obs.classification {
        // Only a strictly more confident, better-than-even verdict replaces
        // the best-known classification.
        if classification.confidence > record.classification_confidence
            && classification.confidence > 0.5
        {
            classification_changed = record.device_type != classification.device_type
                || record.classification_confidence != classification.confidence;
            record.device_type = classification.device_type;
            record.classification_confidence = classification.confidence;
            record.classification_reasoning = classification.reasoning.clone();
        }
    }

    record.status = AssetStatus::Online;
    record.last_collection = obs.status;
    record.last_merged_at = now;
    record.last_observed_at = record.last_observed_at.max(obs.observed_at);
    record.merge_count += 1;
    finish_record(&mut record, fp, obs, policy);

    let payload = if changes.is_empty() && !classification_changed {
        AuditPayload::AssetConfirmed {
            source: primary_source(obs),
        }
    } else {
        AuditPayload::AssetMerged {
            changes,
            sources: sources.into_iter().collect(),
            classification_changed,
        }
    };
    let event = AuditEvent::new(
        record.fingerprint.clone(),
        Some(record.id),
        payload,
        Some(obs.clone()),
    );
    Merged::Applied { record, event }
}

/// Apply the merge rule for the field's kind. Returns the change, if the
/// current value was replaced.
fn merge_field(
    field: &mut FieldValue,
    incoming: &Incoming,
    observed_at: DateTime<Utc>,
    policy: &MergePolicy,
) -> Option<FieldDelta> {
    let new_stamp = stamp(incoming, observed_at);

    if field.value == incoming.value {
        record_source(field, new_stamp, policy.provenance_cap);
        return None;
    }

    let is_newer = field
        .current_observed_at()
        .map_or(true, |current| observed_at >= current);

    let rule = match field.kind {
        FieldKind::Descriptive => {
            more_complete(&incoming.value, &field.value).then_some(MergeRule::MoreComplete)
        }
        FieldKind::Identity | FieldKind::Ownership | FieldKind::State => {
            is_newer.then_some(MergeRule::MostRecent)
        }
        FieldKind::Hardware => {
            let outranked = field
                .current_trust()
                .is_some_and(|current| current > incoming.trust);
            (is_newer && !outranked).then_some(MergeRule::MostRecent)
        }
    };

    record_source(field, new_stamp, policy.provenance_cap);

    let rule = rule?;
    let previous = std::mem::replace(&mut field.value, incoming.value.clone());
    if field.kind.keeps_history() {
        field.history.push(FieldChange {
            previous: previous.clone(),
            current: incoming.value.clone(),
            source: incoming.source.clone(),
            changed_at: observed_at,
        });
        if field.history.len() > policy.history_cap {
            let excess = field.history.len() - policy.history_cap;
            field.history.drain(..excess);
        }
    }
    // Re-apply the cap now that the current value changed.
    cap_sources(field, policy.provenance_cap);

    Some(FieldDelta {
        field: incoming.name.clone(),
        previous: Some(previous),
        current: incoming.value.clone(),
        rule,
        source: incoming.source.clone(),
    })
}

/// Whether `incoming` is more complete than `existing`: a strict superset of
/// its comma/semicolon-separated items, or longer when neither contains the
/// other. Ties keep the existing value.
pub fn more_complete(incoming: &str, existing: &str) -> bool {
    let items = |s: &str| -> BTreeSet<String> {
        s.split([',', ';'])
            .map(fingerprint::normalize)
            .filter(|item| !item.is_empty())
            .collect()
    };
    let new_items = items(incoming);
    let old_items = items(existing);

    if new_items.is_superset(&old_items) && new_items.len() > old_items.len() {
        return true;
    }
    if old_items.is_superset(&new_items) {
        return false;
    }
    incoming.trim().len() > existing.trim().len()
}

/// Add a source stamp, de-duplicated by (source, value).
fn record_source(field: &mut FieldValue, stamp: SourceStamp, cap: usize) {
    match field
        .sources
        .iter_mut()
        .find(|s| s.source == stamp.source && s.value == stamp.value)
    {
        Some(existing) => {
            existing.observed_at = existing.observed_at.max(stamp.observed_at);
            existing.trust = existing.trust.max(stamp.trust);
        }
        None => field.sources.push(stamp),
    }
    cap_sources(field, cap);
}

/// Drop the oldest stamps beyond `cap`, stamps for superseded values first.
fn cap_sources(field: &mut FieldValue, cap: usize) {
    while field.sources.len() > cap {
        let victim = field
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value != field.value)
            .min_by_key(|(_, s)| s.observed_at)
            .or_else(|| {
                field
                    .sources
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.observed_at)
            })
            .map(|(i, _)| i);
        match victim {
            Some(i) => {
                field.sources.remove(i);
            }
            None => break,
        }
    }
}

/// Aliases, replay ring, and completeness: bookkeeping common to new and
/// updated records.
fn finish_record(record: &mut AssetRecord, fp: &Fingerprint, obs: &Observation, policy: &MergePolicy) {
    record.aliases.extend(fp.aliases.iter().cloned());
    if record.identity_tier > fleet_core::IdentityTier::Mac {
        // A serial-keyed record also answers to its MAC, so observations that
        // carry only a MAC (SNMP, unauthenticated probes) land on it.
        if let Some(mac_key) = fp.mac_key() {
            record.aliases.insert(mac_key.to_string());
        }
    }
    record.aliases.remove(&record.fingerprint);

    record.recent_observations.push(obs.id);
    if record.recent_observations.len() > policy.replay_ring {
        let excess = record.recent_observations.len() - policy.replay_ring;
        record.recent_observations.drain(..excess);
    }

    record.completeness = completeness(record);
}

/// Fraction of core inventory fields present in the record.
pub fn completeness(record: &AssetRecord) -> f64 {
    let present = fields::CORE_INVENTORY
        .iter()
        .filter(|name| record.value(name).is_some_and(|v| !v.is_empty()))
        .count();
    present as f64 / fields::CORE_INVENTORY.len() as f64
}

/// Every value an observation contributes. Collector fields override
/// probe- and fingerprint-derived values of the same name.
fn contributions(obs: &Observation) -> Vec<Incoming> {
    let mut out: BTreeMap<String, Incoming> = BTreeMap::new();
    let mut put = |name: &str, value: String, source: &str, trust: SourceTrust| {
        out.insert(
            name.to_string(),
            Incoming {
                name: name.to_string(),
                value,
                source: source.to_string(),
                trust,
            },
        );
    };

    put(fields::IP_ADDRESS, obs.target.to_string(), "probe", SourceTrust::Inferred);
    if !obs.open_ports.is_empty() {
        let ports = obs
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        put(fields::OPEN_PORTS, ports, "probe", SourceTrust::Inferred);
    }

    for (name, value) in [
        (fields::OS_FAMILY, &obs.os_family),
        (fields::OS_VERSION, &obs.os_version),
    ] {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            put(name, value.to_string(), "fingerprint", SourceTrust::Fingerprinted);
        }
    }

    let collector = obs.collector.as_deref().unwrap_or("collector");
    let trust = obs.collector_trust();
    for name in obs.fields.keys() {
        let Some(value) = obs.field(name) else {
            continue;
        };
        let value = if name == fields::MAC_ADDRESS {
            fingerprint::first_valid_mac(value).unwrap_or_else(|| value.to_string())
        } else {
            value.to_string()
        };
        put(name.as_str(), value, collector, trust);
    }

    out.into_values().collect()
}

fn stamp(incoming: &Incoming, observed_at: DateTime<Utc>) -> SourceStamp {
    SourceStamp {
        source: incoming.source.clone(),
        trust: incoming.trust,
        value: incoming.value.clone(),
        observed_at,
    }
}

fn primary_source(obs: &Observation) -> String {
    obs.collector.clone().unwrap_or_else(|| "probe".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use fleet_core::{Classification, CollectionStatus, DeviceType};

    fn observation(ip: &str, collector: &str, fields: &[(&str, &str)]) -> Observation {
        let mut draft = Observation::builder(ip.parse().unwrap())
            .reachable(true)
            .open_ports([135, 445])
            .collector(collector, CollectionStatus::Success);
        for (name, value) in fields {
            draft = draft.field(name, *value);
        }
        draft.finish()
    }

    fn applied(merged: Merged) -> (AssetRecord, AuditEvent) {
        match merged {
            Merged::Applied { record, event } => (record, event),
            Merged::Conflict(c) => panic!("unexpected conflict: {}", c.reason),
        }
    }

    fn merge_all(observations: &[Observation]) -> AssetRecord {
        let policy = MergePolicy::default();
        let mut record: Option<AssetRecord> = None;
        for obs in observations {
            let fp = fingerprint::resolve(obs);
            let (next, _) = applied(merge(record.as_ref(), &fp, obs, &policy, Utc::now()));
            record = Some(next);
        }
        record.unwrap()
    }

    #[test]
    fn storage_superset_is_kept_with_both_sources() {
        let first = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::STORAGE, "Disk1=232.88GB")],
        );
        let second = observation(
            "10.0.1.5",
            "ssh",
            &[
                (fields::BIOS_SERIAL, "BD35LH2"),
                (fields::STORAGE, "Disk1=232.88GB, Disk2=931.51GB"),
            ],
        );
        let record = merge_all(&[first, second]);

        let storage = &record.fields[fields::STORAGE];
        assert_eq!(storage.value, "Disk1=232.88GB, Disk2=931.51GB");
        let sources: Vec<_> = storage.sources.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["wmi", "ssh"]);
        assert_eq!(record.merge_count, 2);
    }

    #[test]
    fn less_complete_storage_does_not_replace() {
        let record = merge_all(&[
            observation(
                "10.0.1.5",
                "wmi",
                &[
                    (fields::BIOS_SERIAL, "BD35LH2"),
                    (fields::STORAGE, "Disk1=232.88GB, Disk2=931.51GB"),
                ],
            ),
            observation(
                "10.0.1.5",
                "wmi",
                &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::STORAGE, "Disk1=232.88GB")],
            ),
        ]);
        assert_eq!(record.value(fields::STORAGE), Some("Disk1=232.88GB, Disk2=931.51GB"));
        assert_eq!(record.fields[fields::STORAGE].sources.len(), 2);
    }

    #[test]
    fn remerging_the_same_observation_is_a_noop() {
        let policy = MergePolicy::default();
        let obs = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::HOSTNAME, "WS-001")],
        );
        let fp = fingerprint::resolve(&obs);

        let (once, _) = applied(merge(None, &fp, &obs, &policy, Utc::now()));
        let later = Utc::now() + TimeDelta::seconds(5);
        let (twice, event) = applied(merge(Some(&once), &fp, &obs, &policy, later));

        assert_eq!(event.payload, AuditPayload::ObservationReplayed);
        assert_eq!(twice.last_merged_at, later);
        let mut expected = once.clone();
        expected.last_merged_at = later;
        assert_eq!(twice, expected);
    }

    #[test]
    fn fields_never_regress_to_empty() {
        let record = merge_all(&[
            observation(
                "10.0.1.5",
                "wmi",
                &[
                    (fields::BIOS_SERIAL, "BD35LH2"),
                    (fields::RAM_GB, "16"),
                    (fields::LOGGED_IN_USER, "corp\\john"),
                ],
            ),
            observation(
                "10.0.1.5",
                "wmi",
                &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::RAM_GB, "  ")],
            ),
        ]);
        assert_eq!(record.value(fields::RAM_GB), Some("16"));
        assert_eq!(record.value(fields::LOGGED_IN_USER), Some("corp\\john"));
    }

    #[test]
    fn ownership_change_appends_history() {
        let t0 = Utc::now();
        let first = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::LOGGED_IN_USER, "corp\\john")],
        );
        let mut second = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::LOGGED_IN_USER, "corp\\mary")],
        );
        second.observed_at = t0 + TimeDelta::days(30);
        let record = merge_all(&[first, second]);

        let user = &record.fields[fields::LOGGED_IN_USER];
        assert_eq!(user.value, "corp\\mary");
        assert_eq!(user.history.len(), 1);
        assert_eq!(user.history[0].previous, "corp\\john");
        assert_eq!(user.history[0].current, "corp\\mary");
    }

    #[test]
    fn older_observation_does_not_override_identity_field() {
        let t0 = Utc::now();
        let mut newer = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::ASSIGNED_USER, "mary")],
        );
        newer.observed_at = t0;
        let mut stale = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::ASSIGNED_USER, "john")],
        );
        stale.observed_at = t0 - TimeDelta::hours(6);

        let record = merge_all(&[newer, stale]);
        assert_eq!(record.value(fields::ASSIGNED_USER), Some("mary"));
        assert!(record.fields[fields::ASSIGNED_USER].history.is_empty());
    }

    #[test]
    fn collected_ram_outranks_inferred_ram() {
        let collected = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::RAM_GB, "16")],
        );
        // A probe-level observation carrying the field without a collector
        // has inferred trust.
        let mut inferred = Observation::builder("10.0.1.5".parse().unwrap())
            .reachable(true)
            .field(fields::BIOS_SERIAL, "BD35LH2")
            .field(fields::RAM_GB, "8")
            .finish();
        inferred.observed_at = collected.observed_at + TimeDelta::minutes(5);

        let record = merge_all(&[collected, inferred]);
        assert_eq!(record.value(fields::RAM_GB), Some("16"));
    }

    #[test]
    fn newer_collected_ram_replaces_older() {
        let first = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::RAM_GB, "8")],
        );
        let mut second = observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::RAM_GB, "16")],
        );
        second.observed_at = first.observed_at + TimeDelta::days(1);
        let record = merge_all(&[first, second]);
        assert_eq!(record.value(fields::RAM_GB), Some("16"));
        assert!(record.fields[fields::RAM_GB].history.is_empty());
    }

    #[test]
    fn classification_never_downgrades() {
        let policy = MergePolicy::default();
        let strong = Observation::builder("10.0.1.6".parse().unwrap())
            .reachable(true)
            .classification(Classification {
                device_type: DeviceType::Server,
                confidence: 0.8,
                reasoning: "directory service ports".to_string(),
            })
            .finish();
        let fp = fingerprint::resolve(&strong);
        let (record, _) = applied(merge(None, &fp, &strong, &policy, Utc::now()));

        for (device_type, confidence) in [
            (DeviceType::Workstation, 0.65),
            (DeviceType::Workstation, 0.8),
            (DeviceType::Unknown, 0.0),
        ] {
            let weaker = Observation::builder("10.0.1.6".parse().unwrap())
                .reachable(true)
                .classification(Classification {
                    device_type,
                    confidence,
                    reasoning: "noise".to_string(),
                })
                .finish();
            let (next, _) = applied(merge(Some(&record), &fp, &weaker, &policy, Utc::now()));
            assert_eq!(next.device_type, DeviceType::Server);
            assert_eq!(next.classification_confidence, 0.8);
        }

        let stronger = Observation::builder("10.0.1.6".parse().unwrap())
            .reachable(true)
            .classification(Classification {
                device_type: DeviceType::Server,
                confidence: 0.9,
                reasoning: "fingerprint hint".to_string(),
            })
            .finish();
        let (next, event) = applied(merge(Some(&record), &fp, &stronger, &policy, Utc::now()));
        assert_eq!(next.classification_confidence, 0.9);
        assert!(matches!(
            event.payload,
            AuditPayload::AssetMerged {
                classification_changed: true,
                ..
            }
        ));
    }

    #[test]
    fn low_confidence_classification_does_not_replace_unknown() {
        let policy = MergePolicy::default();
        let bare = Observation::builder("10.0.1.7".parse().unwrap())
            .reachable(true)
            .finish();
        let fp = fingerprint::resolve(&bare);
        let (record, _) = applied(merge(None, &fp, &bare, &policy, Utc::now()));
        assert_eq!(record.device_type, DeviceType::Unknown);

        let hostname_only = Observation::builder("10.0.1.7".parse().unwrap())
            .reachable(true)
            .classification(Classification {
                device_type: DeviceType::Server,
                confidence: 0.4,
                reasoning: "hostname pattern".to_string(),
            })
            .finish();
        let (next, _) = applied(merge(Some(&record), &fp, &hostname_only, &policy, Utc::now()));
        assert_eq!(next.device_type, DeviceType::Unknown);
    }

    #[test]
    fn provenance_is_deduplicated_and_capped() {
        let policy = MergePolicy {
            provenance_cap: 3,
            ..Default::default()
        };
        let base = Utc::now();
        let mut record: Option<AssetRecord> = None;
        for i in 0..10 {
            let mut obs = observation(
                "10.0.1.5",
                if i % 2 == 0 { "wmi" } else { "ssh" },
                &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::CPU, "Intel Xeon E-2224")],
            );
            obs.observed_at = base + TimeDelta::minutes(i);
            let fp = fingerprint::resolve(&obs);
            let (next, _) = applied(merge(record.as_ref(), &fp, &obs, &policy, Utc::now()));
            record = Some(next);
        }
        let record = record.unwrap();
        let cpu = &record.fields[fields::CPU];
        assert_eq!(cpu.sources.len(), 2);
        assert_eq!(record.fields[fields::IP_ADDRESS].sources.len(), 1);
        assert_eq!(record.merge_count, 10);
    }

    #[test]
    fn completeness_counts_core_fields() {
        let record = merge_all(&[observation(
            "10.0.1.5",
            "wmi",
            &[
                (fields::BIOS_SERIAL, "BD35LH2"),
                (fields::HOSTNAME, "WS-001"),
                (fields::MANUFACTURER, "Dell Inc."),
                (fields::RAM_GB, "16"),
            ],
        )]);
        assert!((record.completeness - 3.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn more_complete_rules() {
        assert!(more_complete("Disk1=232.88GB, Disk2=931.51GB", "Disk1=232.88GB"));
        assert!(!more_complete("Disk1=232.88GB", "Disk1=232.88GB, Disk2=931.51GB"));
        assert!(more_complete("Intel(R) Core(TM) i7-8700 @ 3.20GHz", "Intel Core i7"));
        assert!(!more_complete("Dell P2419H", "Dell P2419H"));
    }

    #[test]
    fn serial_record_gets_mac_alias() {
        let record = merge_all(&[observation(
            "10.0.1.5",
            "wmi",
            &[(fields::BIOS_SERIAL, "BD35LH2"), (fields::MAC_ADDRESS, "3C-52-82-11-22-33")],
        )]);
        assert!(record.aliases.contains("mac:3c:52:82:11:22:33"));
        assert_eq!(record.value(fields::MAC_ADDRESS), Some("3c:52:82:11:22:33"));
    }
}
