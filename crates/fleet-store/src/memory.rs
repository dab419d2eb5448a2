//! In-memory asset store.
//!
//! Also the index behind [`FileAssetStore`](crate::FileAssetStore), which
//! mirrors every write to disk.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fleet_core::{AssetId, AssetRecord, AuditEvent, IdentityConflict};

use crate::{AssetStore, Result};

/// Records plus their lookup indexes.
#[derive(Debug, Default)]
pub(crate) struct AssetIndex {
    assets: HashMap<AssetId, AssetRecord>,
    by_fingerprint: HashMap<String, AssetId>,
    by_alias: HashMap<String, BTreeSet<AssetId>>,
    by_address: HashMap<IpAddr, BTreeSet<AssetId>>,
    pub(crate) audit: Vec<AuditEvent>,
    pub(crate) conflicts: Vec<IdentityConflict>,
}

impl AssetIndex {
    pub(crate) fn insert(&mut self, record: AssetRecord) {
        if let Some(previous) = self.assets.remove(&record.id) {
            self.unindex(&previous);
        }

        self.by_fingerprint
            .insert(record.fingerprint.clone(), record.id);
        for alias in &record.aliases {
            self.by_alias
                .entry(alias.clone())
                .or_default()
                .insert(record.id);
        }
        if let Some(address) = record.address() {
            self.by_address.entry(address).or_default().insert(record.id);
        }
        self.assets.insert(record.id, record);
    }

    fn unindex(&mut self, record: &AssetRecord) {
        if self.by_fingerprint.get(&record.fingerprint) == Some(&record.id) {
            self.by_fingerprint.remove(&record.fingerprint);
        }
        for alias in &record.aliases {
            if let Some(ids) = self.by_alias.get_mut(alias) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.by_alias.remove(alias);
                }
            }
        }
        if let Some(address) = record.address() {
            if let Some(ids) = self.by_address.get_mut(&address) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.by_address.remove(&address);
                }
            }
        }
    }

    pub(crate) fn find_by_fingerprint(&self, fingerprint: &str) -> Option<AssetRecord> {
        if let Some(id) = self.by_fingerprint.get(fingerprint) {
            return self.assets.get(id).cloned();
        }
        self.find_by_alias(fingerprint).into_iter().next()
    }

    pub(crate) fn find_by_alias(&self, key: &str) -> Vec<AssetRecord> {
        self.by_alias
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.assets.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn find_by_address(&self, address: IpAddr) -> Option<AssetRecord> {
        self.by_address
            .get(&address)?
            .iter()
            .filter_map(|id| self.assets.get(id))
            .max_by_key(|r| r.last_observed_at)
            .cloned()
    }

    pub(crate) fn list_assets(&self) -> Vec<AssetRecord> {
        let mut records: Vec<_> = self.assets.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

/// Volatile store for tests and one-shot scans.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    index: RwLock<AssetIndex>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log, oldest first.
    pub async fn audit_log(&self) -> Vec<AuditEvent> {
        self.index.read().await.audit.clone()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn upsert(&self, record: &AssetRecord) -> Result<()> {
        self.index.write().await.insert(record.clone());
        Ok(())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AssetRecord>> {
        Ok(self.index.read().await.find_by_fingerprint(fingerprint))
    }

    async fn find_by_alias(&self, key: &str) -> Result<Vec<AssetRecord>> {
        Ok(self.index.read().await.find_by_alias(key))
    }

    async fn find_by_address(&self, address: IpAddr) -> Result<Option<AssetRecord>> {
        Ok(self.index.read().await.find_by_address(address))
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        self.index.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn record_conflict(&self, conflict: &IdentityConflict) -> Result<()> {
        self.index.write().await.conflicts.push(conflict.clone());
        Ok(())
    }

    async fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        Ok(self.index.read().await.list_assets())
    }

    async fn list_conflicts(&self) -> Result<Vec<IdentityConflict>> {
        Ok(self.index.read().await.conflicts.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;
    use fleet_core::{
        fields, AssetStatus, AuditPayload, CollectionStatus, DeviceType, FieldKind, FieldValue,
        IdentityTier, SourceStamp, SourceTrust,
    };

    pub(crate) fn make_record(fingerprint: &str, ip: &str) -> AssetRecord {
        let now = Utc::now();
        let mut fields = BTreeMap::new();
        fields.insert(
            fields::IP_ADDRESS.to_string(),
            FieldValue {
                value: ip.to_string(),
                kind: FieldKind::State,
                sources: vec![SourceStamp {
                    source: "probe".to_string(),
                    trust: SourceTrust::Inferred,
                    value: ip.to_string(),
                    observed_at: now,
                }],
                history: vec![],
            },
        );
        AssetRecord {
            id: AssetId::new(),
            fingerprint: fingerprint.to_string(),
            aliases: BTreeSet::new(),
            identity_tier: IdentityTier::Mac,
            device_type: DeviceType::Workstation,
            classification_confidence: 0.6,
            classification_reasoning: "test".to_string(),
            fields,
            status: AssetStatus::Online,
            last_collection: CollectionStatus::Success,
            completeness: 0.0,
            created_at: now,
            last_merged_at: now,
            last_observed_at: now,
            merge_count: 1,
            recent_observations: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_and_find_by_fingerprint() {
        let store = MemoryAssetStore::new();
        let record = make_record("mac:aa:bb:cc:dd:ee:01", "10.0.1.1");
        store.upsert(&record).await.unwrap();

        let found = store
            .find_by_fingerprint("mac:aa:bb:cc:dd:ee:01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert!(store.find_by_fingerprint("mac:00").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rekeyed_record_drops_old_fingerprint_index() {
        let store = MemoryAssetStore::new();
        let mut record = make_record("ip:10.0.1.1", "10.0.1.1");
        store.upsert(&record).await.unwrap();

        record.aliases.insert(record.fingerprint.clone());
        record.fingerprint = "serial:bd35lh2".to_string();
        store.upsert(&record).await.unwrap();

        let by_new = store.find_by_fingerprint("serial:bd35lh2").await.unwrap();
        assert_eq!(by_new.map(|r| r.id), Some(record.id));

        // The old key still resolves, now through the alias index.
        let by_old = store.find_by_fingerprint("ip:10.0.1.1").await.unwrap();
        assert_eq!(by_old.map(|r| r.id), Some(record.id));
        assert_eq!(store.list_assets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_address_prefers_latest_observation() {
        let store = MemoryAssetStore::new();
        let older = make_record("mac:aa:bb:cc:dd:ee:01", "10.0.1.9");
        let mut newer = make_record("mac:aa:bb:cc:dd:ee:02", "10.0.1.9");
        newer.last_observed_at = older.last_observed_at + chrono::TimeDelta::seconds(30);
        store.upsert(&older).await.unwrap();
        store.upsert(&newer).await.unwrap();

        let found = store
            .find_by_address("10.0.1.9".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn audit_log_is_append_only_in_order() {
        let store = MemoryAssetStore::new();
        for target in ["10.0.1.1", "10.0.1.2"] {
            let event = AuditEvent::new(
                format!("ip:{target}"),
                None,
                AuditPayload::UnreachableUnmatched {
                    target: target.to_string(),
                },
                None,
            );
            store.append_audit(&event).await.unwrap();
        }

        let log = store.audit_log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].fingerprint, "ip:10.0.1.1");
        assert_eq!(log[1].fingerprint, "ip:10.0.1.2");
    }
}
