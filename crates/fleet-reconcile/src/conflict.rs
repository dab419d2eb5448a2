//! Identity-conflict detection.
//!
//! Two observations that share a hardware serial but disagree on both MAC
//! and hostname within a short window are treated as a data-quality problem
//! (duplicated serials from provisioning), not as the same device.

use chrono::Utc;

use fleet_core::{
    fields, AssetRecord, ConflictId, ConflictStatus, IdentityConflict, IdentityTier, Observation,
};

use crate::fingerprint::{self, Fingerprint};

/// Return the conflict `obs` would raise against `record`, if any.
///
/// Requires both sides to be serial-keyed, both secondary signals to be
/// known on both sides and different, and the observations to fall within
/// `window_secs` of each other. A different user or a reimaged machine seen
/// outside the window is an ordinary update.
pub fn detect(
    record: &AssetRecord,
    fp: &Fingerprint,
    obs: &Observation,
    window_secs: i64,
) -> Option<IdentityConflict> {
    if fp.tier != IdentityTier::Serial || record.identity_tier != IdentityTier::Serial {
        return None;
    }

    let existing_mac = record.value(fields::MAC_ADDRESS).and_then(fingerprint::first_valid_mac);
    let incoming_mac = obs.field(fields::MAC_ADDRESS).and_then(fingerprint::first_valid_mac);
    let existing_host = record
        .value(fields::HOSTNAME)
        .and_then(fingerprint::normalize_hostname);
    let incoming_host = obs.field(fields::HOSTNAME).and_then(fingerprint::normalize_hostname);

    let mac_differs = matches!((&existing_mac, &incoming_mac), (Some(a), Some(b)) if a != b);
    let host_differs = matches!((&existing_host, &incoming_host), (Some(a), Some(b)) if a != b);
    if !(mac_differs && host_differs) {
        return None;
    }

    let gap = (obs.observed_at - record.last_observed_at).num_seconds().abs();
    if gap > window_secs {
        return None;
    }

    let reason = format!(
        "serial shared within {gap}s but MAC ({} vs {}) and hostname ({} vs {}) both differ",
        existing_mac.as_deref().unwrap_or_default(),
        incoming_mac.as_deref().unwrap_or_default(),
        existing_host.as_deref().unwrap_or_default(),
        incoming_host.as_deref().unwrap_or_default(),
    );

    Some(IdentityConflict {
        id: ConflictId::new(),
        fingerprint: fp.key.clone(),
        asset_id: record.id,
        existing_mac,
        incoming_mac,
        existing_hostname: existing_host,
        incoming_hostname: incoming_host,
        existing_observed_at: record.last_observed_at,
        reason,
        status: ConflictStatus::Open,
        raised_at: Utc::now(),
        observation: obs.clone(),
    })
}
