//! Write operations against Neo4j inside an explicit transaction.
//!
//! Nodes are addressed by `(label, uuid)`. Labels, relationship types and
//! property names are interpolated into Cypher, so callers must only pass
//! identifiers that were checked against the schema.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, BoltType, Query, Row, Txn};

use tabgraph_core::{NodeId, NodeWrite, PropertyValue, RelationshipWrite};

use crate::client::GraphError;
use crate::store::{DeleteOutcome, MergeOutcome, StoreTxn};

/// One open Neo4j transaction.
pub struct Neo4jTxn {
    txn: Txn,
}

impl Neo4jTxn {
    pub(crate) fn new(txn: Txn) -> Self {
        Self { txn }
    }

    /// Run a query and return its first row, draining the rest.
    pub(crate) async fn fetch_one(&mut self, q: Query) -> Result<Option<Row>, GraphError> {
        let mut stream = self.txn.execute(q).await?;
        let first = stream.next(self.txn.handle()).await?;
        while stream.next(self.txn.handle()).await?.is_some() {}
        Ok(first)
    }

    pub(crate) async fn fetch_count(&mut self, q: Query, column: &str) -> Result<i64, GraphError> {
        match self.fetch_one(q).await? {
            Some(row) => row
                .get::<i64>(column)
                .map_err(|e| GraphError::Decode(format!("{column}: {e}"))),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl StoreTxn for Neo4jTxn {
    async fn node_exists(&mut self, label: &str, id: &NodeId) -> Result<bool, GraphError> {
        self.count_by_uuid(label, id).await.map(|cnt| cnt > 0)
    }

    async fn find_node(
        &mut self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<NodeId>, GraphError> {
        self.find_uuid_by_property(label, property, value).await
    }

    // ── Nodes ────────────────────────────────────────────────────

    async fn create_node(&mut self, node: &NodeWrite) -> Result<(), GraphError> {
        let cypher = format!(
            "CREATE (n:{label} $props)
             SET n.uuid = $id, n.created = $now",
            label = node.label
        );

        let q = query(&cypher)
            .param("props", bolt_props(node))
            .param("id", node.id.to_string())
            .param("now", Utc::now().to_rfc3339());

        self.txn.run(q).await?;
        Ok(())
    }

    async fn merge_node(&mut self, node: &NodeWrite) -> Result<MergeOutcome, GraphError> {
        let cypher = format!(
            "OPTIONAL MATCH (existing:{label} {{uuid: $id}})
             WITH count(existing) = 0 AS fresh
             MERGE (n:{label} {{uuid: $id}})
             ON CREATE SET n += $props, n.created = $now
             ON MATCH SET n += $props, n.updated = $now
             RETURN fresh",
            label = node.label
        );

        let q = query(&cypher)
            .param("props", bolt_props(node))
            .param("id", node.id.to_string())
            .param("now", Utc::now().to_rfc3339());

        let fresh = match self.fetch_one(q).await? {
            Some(row) => row
                .get::<bool>("fresh")
                .map_err(|e| GraphError::Decode(format!("fresh: {e}")))?,
            None => return Err(GraphError::Decode("MERGE returned no row".to_string())),
        };

        Ok(if fresh {
            MergeOutcome::Created
        } else {
            MergeOutcome::Updated
        })
    }

    async fn delete_node(
        &mut self,
        label: &str,
        id: &NodeId,
    ) -> Result<DeleteOutcome, GraphError> {
        let cypher = format!(
            "MATCH (n:{label} {{uuid: $id}})
             OPTIONAL MATCH (n)-[r]-()
             WITH n, count(r) AS rels
             DETACH DELETE n
             RETURN rels"
        );

        let q = query(&cypher).param("id", id.to_string());

        match self.fetch_one(q).await? {
            Some(row) => {
                let rels = row
                    .get::<i64>("rels")
                    .map_err(|e| GraphError::Decode(format!("rels: {e}")))?;
                Ok(DeleteOutcome {
                    node_deleted: true,
                    relationships_deleted: rels.max(0) as u64,
                })
            }
            None => Ok(DeleteOutcome::default()),
        }
    }

    // ── Relationships ────────────────────────────────────────────

    async fn merge_relationship(&mut self, rel: &RelationshipWrite) -> Result<bool, GraphError> {
        let cypher = format!(
            "MATCH (a:{src} {{uuid: $source_id}})
             MATCH (b:{dst} {{uuid: $target_id}})
             OPTIONAL MATCH (a)-[existing:{rel_type}]->(b)
             WITH a, b, count(existing) = 0 AS fresh
             MERGE (a)-[r:{rel_type}]->(b)
             ON CREATE SET r.created = $now
             RETURN fresh",
            src = rel.source_label,
            dst = rel.target_label,
            rel_type = rel.rel_type
        );

        let q = query(&cypher)
            .param("source_id", rel.source_id.to_string())
            .param("target_id", rel.target_id.to_string())
            .param("now", Utc::now().to_rfc3339());

        match self.fetch_one(q).await? {
            Some(row) => row
                .get::<bool>("fresh")
                .map_err(|e| GraphError::Decode(format!("fresh: {e}"))),
            None => Err(GraphError::Decode(format!(
                "relationship endpoints not found: {} -> {}",
                rel.source_id, rel.target_id
            ))),
        }
    }

    async fn detach_other_targets(&mut self, rel: &RelationshipWrite) -> Result<u64, GraphError> {
        let cypher = format!(
            "MATCH (a:{src} {{uuid: $source_id}})-[r:{rel_type}]->(b:{dst})
             WHERE b.uuid <> $target_id
             DELETE r
             RETURN count(r) AS cnt",
            src = rel.source_label,
            dst = rel.target_label,
            rel_type = rel.rel_type
        );

        let q = query(&cypher)
            .param("source_id", rel.source_id.to_string())
            .param("target_id", rel.target_id.to_string());

        let removed = self.fetch_count(q, "cnt").await?;
        Ok(removed.max(0) as u64)
    }

    // ── Transaction Control ──────────────────────────────────────

    async fn commit(self) -> Result<(), GraphError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), GraphError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub(crate) fn to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Boolean(b) => (*b).into(),
        PropertyValue::Integer(i) => (*i).into(),
        PropertyValue::Float(x) => (*x).into(),
        PropertyValue::String(s) => s.clone().into(),
    }
}

fn bolt_props(node: &NodeWrite) -> HashMap<String, BoltType> {
    node.properties
        .iter()
        .map(|(k, v)| (k.clone(), to_bolt(v)))
        .collect()
}
