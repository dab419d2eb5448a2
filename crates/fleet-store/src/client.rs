//! Bolt connection to the Neo4j asset graph.

use std::time::Duration;

use neo4rs::{ConfigBuilder, Graph, Query, Row, Txn};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("asset graph unreachable at {uri} after {attempts} attempt(s): {reason}")]
    Unreachable {
        uri: String,
        attempts: u32,
        reason: String,
    },

    #[error("asset graph query failed: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("asset graph row could not be decoded: {0}")]
    Decode(String),
}

/// `[store.neo4j]` settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
    pub fetch_size: usize,
    /// Connection attempts made at startup before giving up.
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "fleet-dev".into(),
            max_connections: 8,
            fetch_size: 200,
            connect_attempts: 3,
            connect_backoff_ms: 500,
        }
    }
}

// Password stays out of logged settings.
impl std::fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_attempts", &self.connect_attempts)
            .finish_non_exhaustive()
    }
}

/// Pooled handle to the asset graph. Cloning shares the pool.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect and verify the server answers, retrying with linear backoff.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let attempts = config.connect_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match Self::try_connect(config).await {
                Ok(client) => {
                    tracing::info!(uri = %config.uri, attempt, "Asset graph connected");
                    return Ok(client);
                }
                Err(e) => {
                    tracing::warn!(uri = %config.uri, attempt, error = %e, "Asset graph connect failed");
                    last = e.to_string();
                }
            }
            if attempt < attempts {
                let backoff = config.connect_backoff_ms * u64::from(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(GraphError::Unreachable {
            uri: config.uri.clone(),
            attempts,
            reason: last,
        })
    }

    async fn try_connect(config: &GraphConfig) -> Result<Self, neo4rs::Error> {
        let neo = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size)
            .build()?;
        let client = Self {
            graph: Graph::connect(neo).await?,
        };
        // Graph::connect is lazy about authentication; force a round trip.
        client.graph.run(neo4rs::query("RETURN 1")).await?;
        Ok(client)
    }

    /// Run a statement whose result rows are not needed.
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        Ok(self.graph.run(query).await?)
    }

    pub async fn fetch_all(&self, query: Query) -> Result<Vec<Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub async fn fetch_first(&self, query: Query) -> Result<Option<Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Open an explicit transaction for multi-statement writes.
    pub async fn begin(&self) -> Result<Txn, GraphError> {
        Ok(self.graph.start_txn().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_password() {
        let config = GraphConfig {
            password: "s3cret-graph-pass".into(),
            ..GraphConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret-graph-pass"));
        assert!(rendered.contains("connect_attempts"));
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let config: GraphConfig =
            serde_json::from_value(serde_json::json!({"uri": "bolt://graph.lab:7687"})).unwrap();
        assert_eq!(config.uri, "bolt://graph.lab:7687");
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.user, "neo4j");
    }

    #[tokio::test]
    async fn unreachable_server_reports_attempts() {
        let config = GraphConfig {
            uri: "bolt://127.0.0.1:1".into(),
            connect_attempts: 2,
            connect_backoff_ms: 1,
            ..GraphConfig::default()
        };
        match GraphClient::connect(&config).await {
            Err(GraphError::Unreachable { attempts, .. }) => assert_eq!(attempts, 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("port 1 should refuse bolt connections"),
        }
    }
}
