//! Storage seam between the load engine and a graph backend.
//!
//! A store hands out transactions; everything the engine writes for one
//! input file goes through a single [`StoreTxn`] that is either committed or
//! rolled back as a unit.

use async_trait::async_trait;

use tabgraph_core::{NodeId, NodeWrite, PropertyValue, RelationshipWrite};

use crate::client::GraphError;

/// Whether a merge created a new node or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
}

/// Result of deleting a node by identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// False when no node with that identity existed.
    pub node_deleted: bool,
    pub relationships_deleted: u64,
}

/// A graph backend able to open transactions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    type Txn: StoreTxn;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Txn, GraphError>;

    /// Remove every node and relationship. Returns the number of nodes removed.
    async fn wipe(&self) -> Result<u64, GraphError>;
}

/// Logical operations the load engine issues inside one transaction.
///
/// Writes are visible to later reads of the same transaction and to nothing
/// else until [`StoreTxn::commit`].
#[async_trait]
pub trait StoreTxn: Send {
    /// Whether a node with this label and identity exists.
    async fn node_exists(&mut self, label: &str, id: &NodeId) -> Result<bool, GraphError>;

    /// Find the identity of a node of `label` whose `property` equals `value`.
    async fn find_node(
        &mut self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<NodeId>, GraphError>;

    /// Create a node unconditionally.
    async fn create_node(&mut self, node: &NodeWrite) -> Result<(), GraphError>;

    /// Create the node, or merge its properties onto the existing one.
    async fn merge_node(&mut self, node: &NodeWrite) -> Result<MergeOutcome, GraphError>;

    /// Detach and delete a node. Deleting a missing node is a no-op.
    async fn delete_node(&mut self, label: &str, id: &NodeId)
        -> Result<DeleteOutcome, GraphError>;

    /// Create the relationship unless an identical one exists.
    /// Returns true when a relationship was created.
    async fn merge_relationship(&mut self, rel: &RelationshipWrite) -> Result<bool, GraphError>;

    /// Delete relationships of `rel.rel_type` from the source node to nodes
    /// labelled `rel.target_label` other than `rel.target_id`.
    /// Returns the number of relationships deleted.
    async fn detach_other_targets(&mut self, rel: &RelationshipWrite) -> Result<u64, GraphError>;

    async fn commit(self) -> Result<(), GraphError>;

    async fn rollback(self) -> Result<(), GraphError>;
}
