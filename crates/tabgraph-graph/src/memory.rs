//! In-process graph store.
//!
//! A transaction works on a private copy of the graph and publishes it on
//! commit; rollback drops the copy. Only one writer is expected at a time,
//! which matches the loader's single-session model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use tabgraph_core::{NodeId, NodeWrite, PropertyValue, RelationshipWrite};

use crate::client::GraphError;
use crate::store::{DeleteOutcome, GraphStore, MergeOutcome, StoreTxn};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub label: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct StoredRelationship {
    rel_type: String,
    source: NodeId,
    target: NodeId,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, StoredNode>,
    relationships: BTreeSet<StoredRelationship>,
}

/// Shared in-memory graph. Clone is cheap (inner Arc).
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    state: Arc<Mutex<GraphState>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn count_label(&self, label: &str) -> usize {
        self.lock().nodes.values().filter(|n| n.label == label).count()
    }

    pub fn relationship_count(&self) -> usize {
        self.lock().relationships.len()
    }

    pub fn count_relationships(&self, rel_type: &str) -> usize {
        self.lock()
            .relationships
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .count()
    }

    pub fn node(&self, id: &NodeId) -> Option<StoredNode> {
        self.lock().nodes.get(id).cloned()
    }

    pub fn has_relationship(&self, rel_type: &str, source: &NodeId, target: &NodeId) -> bool {
        self.lock().relationships.contains(&StoredRelationship {
            rel_type: rel_type.to_string(),
            source: *source,
            target: *target,
        })
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, GraphError> {
        let working = self.lock().clone();
        Ok(MemoryTxn {
            shared: self.state.clone(),
            working,
        })
    }

    async fn wipe(&self) -> Result<u64, GraphError> {
        let mut state = self.lock();
        let removed = state.nodes.len() as u64;
        *state = GraphState::default();
        tracing::warn!(nodes_removed = removed, "Wiped in-memory graph");
        Ok(removed)
    }
}

/// A transaction over a private copy of the graph.
pub struct MemoryTxn {
    shared: Arc<Mutex<GraphState>>,
    working: GraphState,
}

impl MemoryTxn {
    fn node_with_label(&self, label: &str, id: &NodeId) -> Option<&StoredNode> {
        self.working.nodes.get(id).filter(|n| n.label == label)
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn node_exists(&mut self, label: &str, id: &NodeId) -> Result<bool, GraphError> {
        Ok(self.node_with_label(label, id).is_some())
    }

    async fn find_node(
        &mut self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<NodeId>, GraphError> {
        Ok(self
            .working
            .nodes
            .iter()
            .find(|(_, n)| n.label == label && n.properties.get(property) == Some(value))
            .map(|(id, _)| *id))
    }

    async fn create_node(&mut self, node: &NodeWrite) -> Result<(), GraphError> {
        self.working.nodes.insert(
            node.id,
            StoredNode {
                label: node.label.clone(),
                properties: node.properties.clone(),
            },
        );
        Ok(())
    }

    async fn merge_node(&mut self, node: &NodeWrite) -> Result<MergeOutcome, GraphError> {
        match self.working.nodes.get_mut(&node.id) {
            Some(existing) if existing.label == node.label => {
                for (k, v) in &node.properties {
                    existing.properties.insert(k.clone(), v.clone());
                }
                Ok(MergeOutcome::Updated)
            }
            _ => {
                self.create_node(node).await?;
                Ok(MergeOutcome::Created)
            }
        }
    }

    async fn delete_node(
        &mut self,
        label: &str,
        id: &NodeId,
    ) -> Result<DeleteOutcome, GraphError> {
        if self.node_with_label(label, id).is_none() {
            return Ok(DeleteOutcome::default());
        }
        self.working.nodes.remove(id);

        let before = self.working.relationships.len();
        self.working
            .relationships
            .retain(|r| r.source != *id && r.target != *id);
        let removed = (before - self.working.relationships.len()) as u64;

        Ok(DeleteOutcome {
            node_deleted: true,
            relationships_deleted: removed,
        })
    }

    async fn merge_relationship(&mut self, rel: &RelationshipWrite) -> Result<bool, GraphError> {
        if self.node_with_label(&rel.source_label, &rel.source_id).is_none()
            || self.node_with_label(&rel.target_label, &rel.target_id).is_none()
        {
            return Err(GraphError::Decode(format!(
                "relationship endpoints not found: {} -> {}",
                rel.source_id, rel.target_id
            )));
        }

        Ok(self.working.relationships.insert(StoredRelationship {
            rel_type: rel.rel_type.clone(),
            source: rel.source_id,
            target: rel.target_id,
        }))
    }

    async fn detach_other_targets(&mut self, rel: &RelationshipWrite) -> Result<u64, GraphError> {
        let nodes = &self.working.nodes;
        let stale: Vec<StoredRelationship> = self
            .working
            .relationships
            .iter()
            .filter(|r| {
                r.rel_type == rel.rel_type
                    && r.source == rel.source_id
                    && r.target != rel.target_id
                    && nodes
                        .get(&r.target)
                        .is_some_and(|n| n.label == rel.target_label)
            })
            .cloned()
            .collect();

        for r in &stale {
            self.working.relationships.remove(r);
        }
        Ok(stale.len() as u64)
    }

    async fn commit(self) -> Result<(), GraphError> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        *shared = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), GraphError> {
        Ok(())
    }
}
