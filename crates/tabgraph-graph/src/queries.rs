//! Read operations: identity lookups inside a transaction, plus counting
//! helpers on the client for post-load checks.

use neo4rs::query;
use uuid::Uuid;

use tabgraph_core::{NodeId, PropertyValue};

use crate::client::{GraphClient, GraphError};
use crate::mutations::{to_bolt, Neo4jTxn};

impl Neo4jTxn {
    /// Count nodes of `label` carrying the given identity.
    pub(crate) async fn count_by_uuid(
        &mut self,
        label: &str,
        id: &NodeId,
    ) -> Result<i64, GraphError> {
        let cypher = format!(
            "MATCH (n:{label} {{uuid: $id}})
             RETURN count(n) AS cnt"
        );

        let q = query(&cypher).param("id", id.to_string());
        self.fetch_count(q, "cnt").await
    }

    /// Look up a node by a property value (e.g. Case by case_id).
    pub(crate) async fn find_uuid_by_property(
        &mut self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<NodeId>, GraphError> {
        let cypher = format!(
            "MATCH (n:{label})
             WHERE n.{property} = $value
             RETURN n.uuid AS uuid LIMIT 1"
        );

        let q = query(&cypher).param("value", to_bolt(value));

        match self.fetch_one(q).await? {
            Some(row) => {
                let raw: String = row
                    .get("uuid")
                    .map_err(|e| GraphError::Decode(format!("uuid: {e}")))?;
                let uuid = Uuid::parse_str(&raw)
                    .map_err(|e| GraphError::Decode(format!("uuid {raw}: {e}")))?;
                Ok(Some(NodeId(uuid)))
            }
            None => Ok(None),
        }
    }
}

impl GraphClient {
    /// Count nodes with a given label.
    pub async fn count_nodes(&self, label: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH (n:{label}) RETURN count(n) AS cnt");

        self.count(query(&cypher), "cnt").await
    }

    /// Count relationships of a given type.
    pub async fn count_relationships(&self, rel_type: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH ()-[r:{rel_type}]->() RETURN count(r) AS cnt");

        self.count(query(&cypher), "cnt").await
    }

    /// Read one property of a node as text.
    pub async fn node_property(
        &self,
        label: &str,
        id: &NodeId,
        property: &str,
    ) -> Result<Option<String>, GraphError> {
        let cypher = format!(
            "MATCH (n:{label} {{uuid: $id}})
             RETURN toString(n[$property]) AS value"
        );

        let q = query(&cypher)
            .param("id", id.to_string())
            .param("property", property.to_string());

        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<Option<String>>("value").unwrap_or(None)),
            None => Ok(None),
        }
    }
}
