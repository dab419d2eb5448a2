//! File-backed asset store.
//!
//! Layout:
//! ```text
//! {root}/
//!   assets/{asset_id}.json
//!   conflicts/{conflict_id}.json
//!   audit.jsonl
//! ```
//! Records are written to a temporary file and renamed into place. Records
//! and conflicts are loaded into memory on open and served from there. The
//! audit log is append-only JSON lines and stays on disk; a line torn by a
//! crash is cut off on open so the next append starts a fresh line.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use fleet_core::{AssetRecord, AuditEvent, IdentityConflict};

use crate::memory::AssetIndex;
use crate::{AssetStore, Result, StoreError};

const AUDIT_FILE: &str = "audit.jsonl";

pub struct FileAssetStore {
    root: PathBuf,
    index: RwLock<AssetIndex>,
    /// Serializes appends to the audit file.
    audit: Mutex<()>,
}

impl FileAssetStore {
    /// Open (or create) a store rooted at `root` and load its contents.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("assets")).await?;
        tokio::fs::create_dir_all(root.join("conflicts")).await?;

        let mut index = AssetIndex::default();
        for record in load_dir::<AssetRecord>(&root.join("assets")).await? {
            index.insert(record);
        }
        index.conflicts = load_dir::<IdentityConflict>(&root.join("conflicts")).await?;
        index
            .conflicts
            .sort_by(|a, b| a.raised_at.cmp(&b.raised_at));
        repair_audit(&root.join(AUDIT_FILE)).await?;

        tracing::info!(
            root = %root.display(),
            assets = index.list_assets().len(),
            conflicts = index.conflicts.len(),
            "File asset store opened"
        );

        Ok(Self {
            root,
            index: RwLock::new(index),
            audit: Mutex::new(()),
        })
    }

    /// Read the audit log back from disk, oldest first.
    pub async fn audit_log(&self) -> Result<Vec<AuditEvent>> {
        let _append = self.audit.lock().await;
        load_audit(&self.root.join(AUDIT_FILE)).await
    }

    async fn write_json<T: serde::Serialize>(&self, path: PathBuf, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl AssetStore for FileAssetStore {
    async fn upsert(&self, record: &AssetRecord) -> Result<()> {
        let path = self.root.join("assets").join(format!("{}.json", record.id));
        self.write_json(path, record).await?;
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
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _append = self.audit.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(AUDIT_FILE))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn record_conflict(&self, conflict: &IdentityConflict) -> Result<()> {
        let path = self
            .root
            .join("conflicts")
            .join(format!("{}.json", conflict.id));
        self.write_json(path, conflict).await?;
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

async fn load_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        let item = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Cut a partial final line left by a crash mid-append.
async fn repair_audit(path: &Path) -> Result<()> {
    let content = match tokio::fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if content.is_empty() || content.ends_with(b"\n") {
        return Ok(());
    }

    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = content.len() - keep,
        "Truncating torn audit line"
    );
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_all().await?;
    Ok(())
}

async fn load_audit(path: &Path) -> Result<Vec<AuditEvent>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "Skipping unreadable audit line"
            ),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::make_record;
    use chrono::Utc;
    use fleet_core::{
        AssetId, AuditPayload, ConflictId, ConflictStatus, IdentityConflict, Observation,
    };

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = make_record("serial:bd35lh2", "10.0.1.1");
        {
            let store = FileAssetStore::open(dir.path()).await.unwrap();
            store.upsert(&record).await.unwrap();
        }

        let store = FileAssetStore::open(dir.path()).await.unwrap();
        let found = store.find_by_fingerprint("serial:bd35lh2").await.unwrap();
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn audit_and_conflicts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let conflict = IdentityConflict {
            id: ConflictId::new(),
            fingerprint: "serial:x1234".to_string(),
            asset_id: AssetId::new(),
            existing_mac: Some("aa:bb:cc:dd:ee:01".to_string()),
            incoming_mac: Some("aa:bb:cc:dd:ee:02".to_string()),
            existing_hostname: Some("ws-001".to_string()),
            incoming_hostname: Some("ws-002".to_string()),
            existing_observed_at: Utc::now(),
            reason: "test".to_string(),
            status: ConflictStatus::Open,
            raised_at: Utc::now(),
            observation: Observation::builder("10.0.1.2".parse().unwrap()).finish(),
        };
        {
            let store = FileAssetStore::open(dir.path()).await.unwrap();
            store.record_conflict(&conflict).await.unwrap();
            let event = AuditEvent::new(
                "serial:x1234",
                Some(conflict.asset_id),
                AuditPayload::IdentityConflictRaised {
                    conflict_id: conflict.id,
                    reason: "test".to_string(),
                },
                None,
            );
            store.append_audit(&event).await.unwrap();
        }

        let store = FileAssetStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list_conflicts().await.unwrap(), vec![conflict]);
        let audit = store.audit_log().await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event_type(), "IdentityConflictRaised");
    }

    fn unmatched(ip: &str) -> AuditEvent {
        AuditEvent::new(
            format!("ip:{ip}"),
            None,
            AuditPayload::UnreachableUnmatched {
                target: ip.to_string(),
            },
            None,
        )
    }

    #[tokio::test]
    async fn appends_after_a_torn_line_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileAssetStore::open(dir.path()).await.unwrap();
            store.append_audit(&unmatched("10.0.1.3")).await.unwrap();
        }
        let path = dir.path().join(AUDIT_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"id\":");
        std::fs::write(&path, content).unwrap();

        {
            let store = FileAssetStore::open(dir.path()).await.unwrap();
            assert_eq!(store.audit_log().await.unwrap().len(), 1);
            store.append_audit(&unmatched("10.0.1.4")).await.unwrap();
        }

        let store = FileAssetStore::open(dir.path()).await.unwrap();
        let audit = store.audit_log().await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].fingerprint, "ip:10.0.1.4");
        assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
    }
}
