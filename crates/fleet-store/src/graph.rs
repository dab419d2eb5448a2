//! Neo4j-backed asset store.
//!
//! Each record is an `:Asset` node keyed by `id`, carrying its lookup keys
//! as properties and the full record as a JSON string. Audit events become
//! `:AuditEvent` nodes linked from their asset by `HAS_AUDIT`; conflicts are
//! `:IdentityConflict` nodes.

use std::net::IpAddr;

use async_trait::async_trait;
use neo4rs::query;

use fleet_core::{fields, AssetRecord, AuditEvent, IdentityConflict};

use crate::client::{GraphClient, GraphError};
use crate::{AssetStore, Result};

pub struct GraphAssetStore {
    client: GraphClient,
}

impl GraphAssetStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Create constraints and indexes. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT asset_id IF NOT EXISTS FOR (a:Asset) REQUIRE a.id IS UNIQUE",
            "CREATE CONSTRAINT asset_fingerprint IF NOT EXISTS FOR (a:Asset) REQUIRE a.fingerprint IS UNIQUE",
            "CREATE INDEX asset_ip IF NOT EXISTS FOR (a:Asset) ON (a.ip_address)",
            "CREATE CONSTRAINT audit_id IF NOT EXISTS FOR (e:AuditEvent) REQUIRE e.id IS UNIQUE",
            "CREATE CONSTRAINT conflict_id IF NOT EXISTS FOR (c:IdentityConflict) REQUIRE c.id IS UNIQUE",
        ];
        for cypher in statements {
            self.client.run(query(cypher)).await?;
        }
        tracing::info!("Asset graph schema ensured");
        Ok(())
    }

    async fn records(&self, q: neo4rs::Query) -> Result<Vec<AssetRecord>> {
        let rows = self.client.fetch_all(q).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(decode_record(&row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl AssetStore for GraphAssetStore {
    async fn upsert(&self, record: &AssetRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let aliases: Vec<String> = record.aliases.iter().cloned().collect();

        let q = query(
            "MERGE (a:Asset {id: $id})
             SET a.fingerprint = $fingerprint, a.aliases = $aliases,
                 a.identity_tier = $tier, a.ip_address = $ip_address,
                 a.hostname = $hostname, a.device_type = $device_type,
                 a.confidence = $confidence, a.status = $status,
                 a.completeness = $completeness, a.merge_count = $merge_count,
                 a.created_at = $created_at, a.last_merged_at = $last_merged_at,
                 a.last_observed_at = $last_observed_at, a.record = $record",
        )
        .param("id", record.id.to_string())
        .param("fingerprint", record.fingerprint.clone())
        .param("aliases", aliases)
        .param("tier", ser(&record.identity_tier))
        .param("ip_address", opt_value(record, fields::IP_ADDRESS))
        .param("hostname", opt_value(record, fields::HOSTNAME))
        .param("device_type", record.device_type.to_string())
        .param("confidence", record.classification_confidence)
        .param("status", ser(&record.status))
        .param("completeness", record.completeness)
        .param("merge_count", record.merge_count as i64)
        .param("created_at", record.created_at.to_rfc3339())
        .param("last_merged_at", record.last_merged_at.to_rfc3339())
        .param("last_observed_at", record.last_observed_at.to_rfc3339())
        .param("record", json);

        self.client.run(q).await?;
        Ok(())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AssetRecord>> {
        let q = query(
            "MATCH (a:Asset {fingerprint: $fingerprint})
             RETURN a.record AS record LIMIT 1",
        )
        .param("fingerprint", fingerprint.to_string());

        if let Some(row) = self.client.fetch_first(q).await? {
            return Ok(Some(decode_record(&row)?));
        }
        Ok(self.find_by_alias(fingerprint).await?.into_iter().next())
    }

    async fn find_by_alias(&self, key: &str) -> Result<Vec<AssetRecord>> {
        let q = query(
            "MATCH (a:Asset) WHERE $key IN a.aliases
             RETURN a.record AS record ORDER BY a.created_at",
        )
        .param("key", key.to_string());
        self.records(q).await
    }

    async fn find_by_address(&self, address: IpAddr) -> Result<Option<AssetRecord>> {
        let q = query(
            "MATCH (a:Asset {ip_address: $ip})
             RETURN a.record AS record
             ORDER BY a.last_observed_at DESC LIMIT 1",
        )
        .param("ip", address.to_string());

        match self.client.fetch_first(q).await? {
            Some(row) => Ok(Some(decode_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut txn = self.client.begin().await?;

        let create = query(
            "CREATE (e:AuditEvent {
               id: $id, event_type: $event_type, fingerprint: $fingerprint,
               timestamp: $timestamp, event: $event
             })",
        )
        .param("id", event.id.0.to_string())
        .param("event_type", event.event_type().to_string())
        .param("fingerprint", event.fingerprint.clone())
        .param("timestamp", event.timestamp.to_rfc3339())
        .param("event", json);
        txn.run(create).await.map_err(GraphError::from)?;

        if let Some(asset_id) = event.asset_id {
            let link = query(
                "MATCH (a:Asset {id: $asset_id}), (e:AuditEvent {id: $id})
                 CREATE (a)-[:HAS_AUDIT]->(e)",
            )
            .param("asset_id", asset_id.to_string())
            .param("id", event.id.0.to_string());
            txn.run(link).await.map_err(GraphError::from)?;
        }

        txn.commit().await.map_err(GraphError::from)?;
        Ok(())
    }

    async fn record_conflict(&self, conflict: &IdentityConflict) -> Result<()> {
        let q = query(
            "MERGE (c:IdentityConflict {id: $id})
             SET c.fingerprint = $fingerprint, c.asset_id = $asset_id,
                 c.status = $status, c.reason = $reason,
                 c.raised_at = $raised_at, c.conflict = $conflict",
        )
        .param("id", conflict.id.to_string())
        .param("fingerprint", conflict.fingerprint.clone())
        .param("asset_id", conflict.asset_id.to_string())
        .param("status", ser(&conflict.status))
        .param("reason", conflict.reason.clone())
        .param("raised_at", conflict.raised_at.to_rfc3339())
        .param("conflict", serde_json::to_string(conflict)?);

        self.client.run(q).await?;
        Ok(())
    }

    async fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        self.records(query(
            "MATCH (a:Asset) RETURN a.record AS record ORDER BY a.created_at",
        ))
        .await
    }

    async fn list_conflicts(&self) -> Result<Vec<IdentityConflict>> {
        let rows = self
            .client
            .fetch_all(query(
                "MATCH (c:IdentityConflict)
                 RETURN c.conflict AS conflict ORDER BY c.raised_at",
            ))
            .await?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row
                .get("conflict")
                .map_err(|e| GraphError::Decode(format!("Missing conflict JSON: {e}")))?;
            conflicts.push(serde_json::from_str(&json)?);
        }
        Ok(conflicts)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn decode_record(row: &neo4rs::Row) -> Result<AssetRecord> {
    let json: String = row
        .get("record")
        .map_err(|e| GraphError::Decode(format!("Missing record JSON: {e}")))?;
    Ok(serde_json::from_str(&json)?)
}

fn opt_value(record: &AssetRecord, field: &str) -> String {
    record.value(field).unwrap_or_default().to_string()
}

/// Serialize a unit enum to its bare serde name.
fn ser<T: serde::Serialize>(val: &T) -> String {
    match serde_json::to_value(val) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{AssetStatus, IdentityTier};

    #[test]
    fn ser_strips_json_quotes() {
        assert_eq!(ser(&AssetStatus::Offline), "offline");
        assert_eq!(ser(&IdentityTier::Serial), "serial");
    }
}
