//! Neo4j connection management and shared graph client.

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};

use crate::mutations::Neo4jTxn;
use crate::store::GraphStore;

use serde::Deserialize;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Failed to decode query result: {0}")]
    Decode(String),
}

/// The `[neo4j]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
    /// Nodes removed per statement when wiping.
    pub wipe_batch_size: i64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            max_connections: 4,
            fetch_size: 256,
            wipe_batch_size: 10_000,
        }
    }
}

/// Neo4j-backed [`GraphStore`].
///
/// Each input file is applied inside one explicit transaction obtained from
/// [`GraphStore::begin`].
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    wipe_batch_size: i64,
}

impl GraphClient {
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let settings = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(settings)
            .await
            .map_err(|e| GraphError::Connection(format!("{}: {e}", config.uri)))?;

        tracing::debug!(uri = %config.uri, user = %config.user, "Bolt session pool ready");
        Ok(Self {
            graph,
            wipe_batch_size: config.wipe_batch_size.max(1),
        })
    }

    /// Auto-commit write, outside any load transaction.
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// First row of a read; the rest of the stream is drained.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let first = stream.next().await?;
        while stream.next().await?.is_some() {}
        Ok(first)
    }

    pub(crate) async fn count(&self, q: Query, column: &str) -> Result<i64, GraphError> {
        match self.query_one(q).await? {
            Some(row) => row
                .get::<i64>(column)
                .map_err(|e| GraphError::Decode(format!("{column}: {e}"))),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    type Txn = Neo4jTxn;

    async fn begin(&self) -> Result<Neo4jTxn, GraphError> {
        let txn = self.graph.start_txn().await?;
        Ok(Neo4jTxn::new(txn))
    }

    async fn wipe(&self) -> Result<u64, GraphError> {
        let mut removed = 0u64;
        loop {
            let q = query(
                "MATCH (n)
                 WITH n LIMIT $batch
                 DETACH DELETE n
                 RETURN count(*) AS cnt",
            )
            .param("batch", self.wipe_batch_size);
            let deleted = self.count(q, "cnt").await?;
            if deleted <= 0 {
                break;
            }
            removed += deleted as u64;
            tracing::debug!(deleted, removed, "Wipe batch");
        }
        tracing::warn!(nodes_removed = removed, "Wiped all graph contents");
        Ok(removed)
    }
}
