//! The reconcile engine: the single writer of asset records.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use fleet_core::{
    fields, AssetId, AssetRecord, AssetStatus, AuditEvent, AuditPayload, IdentityConflict,
    IdentityTier, Observation, PipelineStage,
};
use fleet_store::AssetStore;

use crate::error::Result;
use crate::fingerprint::{self, Fingerprint};
use crate::locks::KeyedLocks;
use crate::merge::{self, MergePolicy, Merged};

/// What reconciling one observation did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Created(AssetId),
    Merged(AssetId),
    /// Matched a record without changing any value.
    Confirmed(AssetId),
    /// The observation had been merged before.
    Replayed(AssetId),
    MarkedOffline(AssetId),
    /// Unreachable and no record was last seen at the address.
    Unmatched,
    /// Cancelled before reachability was known.
    Incomplete,
    Conflict(IdentityConflict),
}

impl Outcome {
    pub fn asset_id(&self) -> Option<AssetId> {
        match self {
            Self::Created(id)
            | Self::Merged(id)
            | Self::Confirmed(id)
            | Self::Replayed(id)
            | Self::MarkedOffline(id) => Some(*id),
            Self::Conflict(c) => Some(c.asset_id),
            Self::Unmatched | Self::Incomplete => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Merged(_) => "merged",
            Self::Confirmed(_) => "confirmed",
            Self::Replayed(_) => "replayed",
            Self::MarkedOffline(_) => "marked_offline",
            Self::Unmatched => "unmatched",
            Self::Incomplete => "incomplete",
            Self::Conflict(_) => "conflict",
        }
    }
}

/// How a stored record was matched to the incoming fingerprint.
#[derive(Debug)]
enum Match {
    Primary,
    Alias,
    /// The record is keyed by a weaker (or equivalent, shorter) key and is
    /// re-keyed to the incoming fingerprint.
    Promoted {
        previous_fingerprint: String,
        previous_tier: IdentityTier,
    },
    /// An address-only observation landed on the stronger record last seen
    /// at that address. The record keeps its own fingerprint.
    LastSeenAt,
}

#[derive(Debug)]
struct Located {
    record: AssetRecord,
    via: Match,
}

/// Serializes merges per fingerprint and persists their results.
///
/// Observations for different fingerprints reconcile in parallel; for the
/// same fingerprint at most one merge is in flight.
pub struct ReconcileEngine {
    store: Arc<dyn AssetStore>,
    locks: KeyedLocks,
    policy: MergePolicy,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn AssetStore>, policy: MergePolicy) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Reconcile one observation against the store.
    pub async fn reconcile(&self, obs: &Observation) -> Result<Outcome> {
        // A port scan cut short still proved the target alive.
        if obs.interrupted_at == Some(PipelineStage::Probe) && !obs.reachable {
            return self.record_incomplete(obs).await;
        }
        if !obs.reachable {
            return self.mark_offline(obs).await;
        }

        let fp = fingerprint::resolve(obs);
        let mut keys: BTreeSet<String> = fp.candidate_keys().map(str::to_string).collect();

        loop {
            let guard = self.locks.lock_all(&keys).await;
            let located = self.locate(&fp, obs).await?;

            // The matched record may be keyed by something we did not lock
            // (found through an alias). Lock its primary key too and retry.
            if let Some(found) = &located {
                if !guard.holds(&found.record.fingerprint) {
                    keys.insert(found.record.fingerprint.clone());
                    drop(guard);
                    continue;
                }
            }

            let outcome = self.apply(&fp, obs, located).await?;
            drop(guard);
            return Ok(outcome);
        }
    }

    /// Find the record the fingerprint should merge into.
    async fn locate(&self, fp: &Fingerprint, obs: &Observation) -> Result<Option<Located>> {
        if let Some(record) = self.store.find_by_fingerprint(&fp.key).await? {
            if record.fingerprint == fp.key {
                return Ok(Some(Located {
                    record,
                    via: Match::Primary,
                }));
            }
            if compatible(&record, obs) {
                return Ok(Some(Located {
                    record,
                    via: Match::Alias,
                }));
            }
        }

        for alias in &fp.aliases {
            if let Some(record) = self.store.find_by_fingerprint(alias).await? {
                if record.fingerprint == *alias && compatible(&record, obs) {
                    return Ok(Some(Located {
                        via: Match::Promoted {
                            previous_fingerprint: record.fingerprint.clone(),
                            previous_tier: record.identity_tier,
                        },
                        record,
                    }));
                }
            }
            for record in self.store.find_by_alias(alias).await? {
                if compatible(&record, obs) {
                    return Ok(Some(Located {
                        record,
                        via: Match::Alias,
                    }));
                }
            }
        }

        for (key, _) in &fp.fallbacks {
            if let Some(record) = self.store.find_by_fingerprint(key).await? {
                if record.identity_tier < fp.tier {
                    return Ok(Some(Located {
                        via: Match::Promoted {
                            previous_fingerprint: record.fingerprint.clone(),
                            previous_tier: record.identity_tier,
                        },
                        record,
                    }));
                }
            }
        }

        // Only the address is known, typically because every credential was
        // rejected this round. A record with a stronger identity seen at this
        // address recently is the same device.
        if fp.tier == IdentityTier::Address {
            if let Some(record) = self.store.find_by_address(obs.target).await? {
                let gap = (obs.observed_at - record.last_observed_at).num_seconds().abs();
                if record.identity_tier > IdentityTier::Address
                    && gap <= self.policy.conflict_window_secs
                {
                    return Ok(Some(Located {
                        record,
                        via: Match::LastSeenAt,
                    }));
                }
            }
        }

        Ok(None)
    }

    async fn apply(
        &self,
        fp: &Fingerprint,
        obs: &Observation,
        located: Option<Located>,
    ) -> Result<Outcome> {
        let mut promotion = None;
        let existing = located.map(|Located { mut record, via }| {
            if let Match::Promoted {
                previous_fingerprint,
                previous_tier,
            } = via
            {
                record.aliases.insert(previous_fingerprint.clone());
                record.fingerprint = fp.key.clone();
                record.identity_tier = record.identity_tier.max(fp.tier);
                promotion = Some((previous_fingerprint, previous_tier));
            }
            record
        });

        match merge::merge(existing.as_ref(), fp, obs, &self.policy, Utc::now()) {
            Merged::Applied { record, event } => {
                self.store.upsert(&record).await?;

                if let Some((previous_fingerprint, previous_tier)) = promotion {
                    tracing::info!(
                        asset_id = %record.id,
                        from = %previous_fingerprint,
                        to = %record.fingerprint,
                        "Asset promoted to stronger fingerprint"
                    );
                    let promoted = AuditEvent::new(
                        record.fingerprint.clone(),
                        Some(record.id),
                        AuditPayload::AssetPromoted {
                            previous_fingerprint,
                            previous_tier,
                            tier: record.identity_tier,
                        },
                        None,
                    );
                    self.store.append_audit(&promoted).await?;
                }

                let outcome = match &event.payload {
                    AuditPayload::AssetCreated { .. } => Outcome::Created(record.id),
                    AuditPayload::AssetConfirmed { .. } => Outcome::Confirmed(record.id),
                    AuditPayload::ObservationReplayed => Outcome::Replayed(record.id),
                    _ => Outcome::Merged(record.id),
                };
                tracing::debug!(
                    target_ip = %obs.target,
                    fingerprint = %record.fingerprint,
                    asset_id = %record.id,
                    decision = event.event_type(),
                    merge_count = record.merge_count,
                    "Observation reconciled"
                );
                self.store.append_audit(&event).await?;
                Ok(outcome)
            }
            Merged::Conflict(conflict) => {
                tracing::warn!(
                    target_ip = %obs.target,
                    fingerprint = %conflict.fingerprint,
                    asset_id = %conflict.asset_id,
                    reason = %conflict.reason,
                    "Identity conflict raised; merge aborted"
                );
                self.store.record_conflict(&conflict).await?;
                let event = AuditEvent::new(
                    conflict.fingerprint.clone(),
                    Some(conflict.asset_id),
                    AuditPayload::IdentityConflictRaised {
                        conflict_id: conflict.id,
                        reason: conflict.reason.clone(),
                    },
                    Some(obs.clone()),
                );
                self.store.append_audit(&event).await?;
                Ok(Outcome::Conflict(conflict))
            }
        }
    }

    /// Flip the record last seen at the target's address to offline. Nothing
    /// else on the record changes.
    async fn mark_offline(&self, obs: &Observation) -> Result<Outcome> {
        let address_key = fingerprint::address_key(obs.target);
        let Some(found) = self.store.find_by_address(obs.target).await? else {
            tracing::debug!(target_ip = %obs.target, "Unreachable target matches no asset");
            let event = AuditEvent::new(
                address_key,
                None,
                AuditPayload::UnreachableUnmatched {
                    target: obs.target.to_string(),
                },
                Some(obs.clone()),
            );
            self.store.append_audit(&event).await?;
            return Ok(Outcome::Unmatched);
        };

        let keys = BTreeSet::from([found.fingerprint.clone()]);
        let _guard = self.locks.lock_all(&keys).await;

        // Re-read under the lock; a concurrent merge may have moved it.
        let current = self
            .store
            .find_by_fingerprint(&found.fingerprint)
            .await?
            .filter(|r| r.id == found.id && r.address() == Some(obs.target));
        let Some(mut record) = current else {
            return Ok(Outcome::Unmatched);
        };

        if record.status == AssetStatus::Offline {
            return Ok(Outcome::MarkedOffline(record.id));
        }

        record.status = AssetStatus::Offline;
        self.store.upsert(&record).await?;
        let event = AuditEvent::new(
            record.fingerprint.clone(),
            Some(record.id),
            AuditPayload::MarkedOffline {
                target: obs.target.to_string(),
            },
            Some(obs.clone()),
        );
        self.store.append_audit(&event).await?;
        tracing::info!(
            target_ip = %obs.target,
            asset_id = %record.id,
            "Asset marked offline"
        );
        Ok(Outcome::MarkedOffline(record.id))
    }

    async fn record_incomplete(&self, obs: &Observation) -> Result<Outcome> {
        let event = AuditEvent::new(
            fingerprint::address_key(obs.target),
            None,
            AuditPayload::IncompleteObservation {
                target: obs.target.to_string(),
                stage: PipelineStage::Probe.to_string(),
            },
            Some(obs.clone()),
        );
        self.store.append_audit(&event).await?;
        Ok(Outcome::Incomplete)
    }
}

/// An alias match is rejected when both sides know the manufacturer and it
/// differs.
fn compatible(record: &AssetRecord, obs: &Observation) -> bool {
    let theirs = record
        .value(fields::MANUFACTURER)
        .and_then(fingerprint::normalize_attribute);
    let ours = obs
        .field(fields::MANUFACTURER)
        .and_then(fingerprint::normalize_attribute);
    match (theirs, ours) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
