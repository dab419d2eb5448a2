//! Audit events: the append-only record of every merge decision.
//!
//! Consumed by operational tooling when troubleshooting duplicate or
//! mis-merged assets. Each event archives the observation it was derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AssetId, ConflictId, DeviceType, IdentityTier, Observation};

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single merge decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub asset_id: Option<AssetId>,
    pub payload: AuditPayload,
    /// The observation this decision consumed.
    pub observation: Option<Observation>,
}

impl AuditEvent {
    pub fn new(
        fingerprint: impl Into<String>,
        asset_id: Option<AssetId>,
        payload: AuditPayload,
        observation: Option<Observation>,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            fingerprint: fingerprint.into(),
            asset_id,
            payload,
            observation,
        }
    }

    /// Short machine-readable name of the payload variant.
    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            AuditPayload::AssetCreated { .. } => "AssetCreated",
            AuditPayload::AssetMerged { .. } => "AssetMerged",
            AuditPayload::AssetConfirmed { .. } => "AssetConfirmed",
            AuditPayload::ObservationReplayed => "ObservationReplayed",
            AuditPayload::AssetPromoted { .. } => "AssetPromoted",
            AuditPayload::MarkedOffline { .. } => "MarkedOffline",
            AuditPayload::UnreachableUnmatched { .. } => "UnreachableUnmatched",
            AuditPayload::IncompleteObservation { .. } => "IncompleteObservation",
            AuditPayload::IdentityConflictRaised { .. } => "IdentityConflictRaised",
        }
    }
}

/// Which merge rule decided a field change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Field was empty; incoming value adopted.
    Adopted,
    /// Incoming value is a superset of / more detailed than the existing one.
    MoreComplete,
    /// Incoming observation is the most recent.
    MostRecent,
}

/// A changed field in a merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDelta {
    pub field: String,
    pub previous: Option<String>,
    pub current: String,
    pub rule: MergeRule,
    pub source: String,
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum AuditPayload {
    /// First observation for a fingerprint; a new record was seeded.
    AssetCreated {
        device_type: DeviceType,
        field_count: usize,
        source: String,
    },
    /// Fields changed in an existing record.
    AssetMerged {
        changes: Vec<FieldDelta>,
        sources: Vec<String>,
        classification_changed: bool,
    },
    /// The observation matched without changing any value.
    AssetConfirmed { source: String },
    /// The same observation was merged before; nothing changed.
    ObservationReplayed,
    /// A weaker-tier record was re-keyed to a stronger fingerprint.
    AssetPromoted {
        previous_fingerprint: String,
        previous_tier: IdentityTier,
        tier: IdentityTier,
    },
    /// The target did not respond; the matching record went offline.
    MarkedOffline { target: String },
    /// The target did not respond and no record matched its address.
    UnreachableUnmatched { target: String },
    /// The pipeline was cancelled before reachability was known.
    IncompleteObservation { target: String, stage: String },
    /// The merge was aborted and a conflict held for review.
    IdentityConflictRaised { conflict_id: ConflictId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_event_type() {
        let payload = AuditPayload::MarkedOffline {
            target: "10.0.1.7".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event_type\":\"MarkedOffline\""));
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let event = AuditEvent::new(
            "serial:bd35lh2",
            Some(AssetId::new()),
            AuditPayload::AssetMerged {
                changes: vec![FieldDelta {
                    field: "storage".to_string(),
                    previous: Some("Disk1=232.88GB".to_string()),
                    current: "Disk1=232.88GB, Disk2=931.51GB".to_string(),
                    rule: MergeRule::MoreComplete,
                    source: "wmi".to_string(),
                }],
                sources: vec!["wmi".to_string()],
                classification_changed: false,
            },
            None,
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["event_type"], event.event_type());

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
