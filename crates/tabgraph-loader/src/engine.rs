//! Load engine: applies validated records to a graph store.
//!
//! Files are loaded one at a time, in the order given, each inside its own
//! transaction. Within a file every node is written before any relationship,
//! so a relationship's endpoints exist in this or an earlier file.

use std::collections::{HashMap, HashSet};

use tabgraph_core::{
    FileFailure, LoadCounts, LoadMode, LoadReport, NodeId, NodeWrite, PropertyValue,
    RelationshipWrite,
};
use tabgraph_graph::{GraphError, GraphStore, MergeOutcome, StoreTxn};

use crate::config::LoaderConfig;
use crate::confirm::WipeConfirmed;
use crate::error::{LoadError, NodeConflict, UnresolvedReference};
use crate::identity::IdentityAssigner;
use crate::record::{Identity, ParentRef, Record};
use crate::schema::{PropertyType, Schema};

/// The records of one input file; loaded as one atomic unit.
#[derive(Debug, Clone)]
pub struct FileBatch {
    pub file: String,
    pub records: Vec<Record>,
}

/// (node type, field, value) → node id, over every record of the run.
type ReferenceIndex = HashMap<(String, String, String), NodeId>;

pub struct LoadEngine<'a, S: GraphStore> {
    store: &'a S,
    schema: &'a Schema,
    identities: IdentityAssigner,
    cheat_mode: bool,
}

impl<'a, S: GraphStore> LoadEngine<'a, S> {
    pub fn new(store: &'a S, schema: &'a Schema, config: &LoaderConfig) -> Self {
        Self {
            store,
            schema,
            identities: IdentityAssigner::new(&config.domain),
            cheat_mode: false,
        }
    }

    /// Records were not validated; unconvertible values are stored as text.
    pub fn with_cheat_mode(mut self, enabled: bool) -> Self {
        self.cheat_mode = enabled;
        self
    }

    /// Remove everything from the store.
    pub async fn wipe(&self, _confirmed: WipeConfirmed) -> Result<u64, GraphError> {
        let removed = self.store.wipe().await?;
        tracing::warn!(nodes_removed = removed, "Graph wiped");
        Ok(removed)
    }

    /// Load every batch under `mode`.
    ///
    /// A file failing with a conflict or an unresolved reference is rolled
    /// back and listed in `failed_files`; later files still load. A store
    /// failure rolls back the current file and ends the run: it is recorded
    /// in `aborted`, and the remaining files in `files_skipped`. Counts of
    /// files committed before the failure are kept either way.
    pub async fn load(&self, batches: &[FileBatch], mode: LoadMode) -> LoadReport {
        let mut report = LoadReport::new(mode);
        let index = self.reference_index(batches);
        let mut written: HashSet<NodeId> = HashSet::new();

        for (position, batch) in batches.iter().enumerate() {
            match self.load_file(batch, mode, &index, &written).await {
                Ok((counts, ids)) => {
                    report.counts.add(&counts);
                    report.files_loaded.push(batch.file.clone());
                    written.extend(ids);
                }
                Err(e) if e.is_record_level() => {
                    report.failed_files.push(FileFailure {
                        file: batch.file.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    report.files_skipped = batches[position + 1..]
                        .iter()
                        .map(|b| b.file.clone())
                        .collect();
                    tracing::error!(
                        file = %batch.file,
                        error = %e,
                        files_skipped = report.files_skipped.len(),
                        "Store failure, run aborted"
                    );
                    report.aborted = Some(FileFailure {
                        file: batch.file.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        tracing::info!(
            mode = %mode,
            files_loaded = report.files_loaded.len(),
            files_failed = report.failed_files.len(),
            nodes_created = report.counts.nodes_created,
            nodes_updated = report.counts.nodes_updated,
            nodes_deleted = report.counts.nodes_deleted,
            relationships_created = report.counts.relationships_created,
            relationships_deleted = report.counts.relationships_deleted,
            "Load finished"
        );
        report
    }

    async fn load_file(
        &self,
        batch: &FileBatch,
        mode: LoadMode,
        index: &ReferenceIndex,
        written: &HashSet<NodeId>,
    ) -> Result<(LoadCounts, HashSet<NodeId>), LoadError> {
        let file = batch.file.as_str();
        tracing::info!(file, records = batch.records.len(), mode = %mode, "Loading file");

        let mut txn = self.store.begin().await.map_err(store_error(file))?;
        let mut ids = HashSet::new();

        match self.apply(&mut txn, batch, mode, index, written, &mut ids).await {
            Ok(counts) => {
                txn.commit().await.map_err(store_error(file))?;
                tracing::info!(
                    file,
                    nodes_created = counts.nodes_created,
                    nodes_updated = counts.nodes_updated,
                    nodes_deleted = counts.nodes_deleted,
                    relationships_created = counts.relationships_created,
                    relationships_deleted = counts.relationships_deleted,
                    "File committed"
                );
                Ok((counts, ids))
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::error!(file, error = %rollback, "Rollback failed");
                }
                tracing::warn!(file, error = %e, "File rolled back");
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        txn: &mut S::Txn,
        batch: &FileBatch,
        mode: LoadMode,
        index: &ReferenceIndex,
        written: &HashSet<NodeId>,
        ids: &mut HashSet<NodeId>,
    ) -> Result<LoadCounts, LoadError> {
        let file = batch.file.as_str();
        let mut counts = LoadCounts::default();

        // ── Nodes ────────────────────────────────────────────────
        match mode {
            LoadMode::Delete => {
                for record in &batch.records {
                    let identity = self.identity_of(record);
                    let outcome = txn
                        .delete_node(&record.node_type, &identity.id)
                        .await
                        .map_err(store_error(file))?;
                    if outcome.node_deleted {
                        counts.nodes_deleted += 1;
                    }
                    counts.relationships_deleted += outcome.relationships_deleted;
                }
                // Relationships went with their nodes.
                return Ok(counts);
            }
            LoadMode::New => {
                let mut conflicts = Vec::new();
                for record in &batch.records {
                    let identity = self.identity_of(record);
                    let node = self.node_write(record, identity.id);
                    let repeated = written.contains(&node.id) || ids.contains(&node.id);
                    if repeated {
                        // Same node seen earlier in this run: a repeated row, not a conflict.
                        txn.merge_node(&node).await.map_err(store_error(file))?;
                        counts.nodes_updated += 1;
                        continue;
                    }
                    if txn
                        .node_exists(&node.label, &node.id)
                        .await
                        .map_err(store_error(file))?
                    {
                        conflicts.push(NodeConflict {
                            line: record.line,
                            node_type: record.node_type.clone(),
                            signature: identity.signature,
                            id: node.id,
                        });
                        continue;
                    }
                    txn.create_node(&node).await.map_err(store_error(file))?;
                    counts.nodes_created += 1;
                    ids.insert(node.id);
                }
                if !conflicts.is_empty() {
                    return Err(LoadError::Conflict {
                        file: file.to_string(),
                        conflicts,
                    });
                }
            }
            LoadMode::Upsert => {
                for record in &batch.records {
                    let identity = self.identity_of(record);
                    let node = self.node_write(record, identity.id);
                    match txn.merge_node(&node).await.map_err(store_error(file))? {
                        MergeOutcome::Created => counts.nodes_created += 1,
                        MergeOutcome::Updated => counts.nodes_updated += 1,
                    }
                    ids.insert(node.id);
                }
            }
        }

        // ── Relationships ────────────────────────────────────────
        let mut unresolved = Vec::new();
        for record in &batch.records {
            let source_id = self.identity_of(record).id;
            for parent in &record.parents {
                let Some(rule) = self
                    .schema
                    .relationship_between(&record.node_type, &parent.pointer.node_type)
                else {
                    tracing::warn!(
                        file,
                        line = record.line,
                        pointer = %parent.pointer,
                        "No relationship declared for parent pointer, skipping"
                    );
                    continue;
                };

                let Some(target_id) = self
                    .resolve(txn, parent, index)
                    .await
                    .map_err(store_error(file))?
                else {
                    unresolved.push(UnresolvedReference {
                        line: record.line,
                        pointer: parent.pointer.to_string(),
                        value: parent.value.clone(),
                    });
                    continue;
                };

                let rel = RelationshipWrite {
                    rel_type: rule.relationship.clone(),
                    source_label: record.node_type.clone(),
                    source_id,
                    target_label: parent.pointer.node_type.clone(),
                    target_id,
                };
                if mode == LoadMode::Upsert {
                    counts.relationships_deleted += txn
                        .detach_other_targets(&rel)
                        .await
                        .map_err(store_error(file))?;
                }
                if txn
                    .merge_relationship(&rel)
                    .await
                    .map_err(store_error(file))?
                {
                    counts.relationships_created += 1;
                }
            }
        }

        if !unresolved.is_empty() {
            return Err(LoadError::Unresolved {
                file: file.to_string(),
                references: unresolved,
            });
        }
        Ok(counts)
    }

    /// Find the node a parent reference points at: first among the records
    /// of this run, then by identity derivation, then by property lookup.
    async fn resolve(
        &self,
        txn: &mut S::Txn,
        parent: &ParentRef,
        index: &ReferenceIndex,
    ) -> Result<Option<NodeId>, GraphError> {
        let target = parent.pointer.node_type.as_str();
        let field = parent.pointer.field.as_str();

        let key = (target.to_string(), field.to_string(), parent.value.clone());
        if let Some(id) = index.get(&key) {
            if txn.node_exists(target, id).await? {
                return Ok(Some(*id));
            }
        }

        if matches!(self.schema.id_properties(target), [only] if only == field) {
            let id = self.identities.assign(target, &parent.value);
            return Ok(txn.node_exists(target, &id).await?.then_some(id));
        }

        let value = match self
            .schema
            .node_type(target)
            .and_then(|t| t.property(field))
        {
            Some(def) => self.convert(&def.property_type, &parent.value, field),
            None => PropertyValue::from(parent.value.as_str()),
        };
        txn.find_node(target, field, &value).await
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn reference_index(&self, batches: &[FileBatch]) -> ReferenceIndex {
        let referenced: HashSet<(&str, &str)> = batches
            .iter()
            .flat_map(|b| b.records.iter())
            .flat_map(|r| r.parents.iter())
            .map(|p| (p.pointer.node_type.as_str(), p.pointer.field.as_str()))
            .collect();

        let mut index = ReferenceIndex::new();
        for record in batches.iter().flat_map(|b| b.records.iter()) {
            let id = self.identity_of(record).id;
            for (name, value) in &record.properties {
                if referenced.contains(&(record.node_type.as_str(), name.as_str())) {
                    index
                        .entry((record.node_type.clone(), name.clone(), value.clone()))
                        .or_insert(id);
                }
            }
        }
        index
    }

    fn identity_of(&self, record: &Record) -> Identity {
        match &record.identity {
            Some(identity) => identity.clone(),
            None => {
                let signature = IdentityAssigner::signature(record, self.schema);
                let id = self.identities.assign(&record.node_type, &signature);
                Identity { id, signature }
            }
        }
    }

    fn node_write(&self, record: &Record, id: NodeId) -> NodeWrite {
        let node_type = self.schema.node_type(&record.node_type);
        let properties = record
            .properties
            .iter()
            .map(|(name, raw)| {
                let value = match node_type.and_then(|t| t.property(name)) {
                    Some(def) => self.convert(&def.property_type, raw, name),
                    None => PropertyValue::from(raw.as_str()),
                };
                (name.clone(), value)
            })
            .collect();

        NodeWrite {
            label: record.node_type.clone(),
            id,
            properties,
        }
    }

    fn convert(&self, property_type: &PropertyType, raw: &str, name: &str) -> PropertyValue {
        property_type.convert(raw).unwrap_or_else(|reason| {
            tracing::warn!(
                property = name,
                cheat_mode = self.cheat_mode,
                reason = %reason,
                "Storing unconvertible value as text"
            );
            PropertyValue::from(raw)
        })
    }
}

fn store_error(file: &str) -> impl Fn(GraphError) -> LoadError + '_ {
    move |source| LoadError::Store {
        file: file.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::test_schema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabgraph_graph::MemoryGraph;

    const DOMAIN: &str = "research.example.org";

    fn config() -> LoaderConfig {
        LoaderConfig {
            domain: DOMAIN.to_string(),
            ..Default::default()
        }
    }

    fn cases(ids: &[&str]) -> FileBatch {
        FileBatch {
            file: "case.txt".to_string(),
            records: ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    Record::new("case.txt", i as u64 + 2, "case")
                        .with_property("case_id", id)
                        .with_property("age", "40")
                })
                .collect(),
        }
    }

    fn samples(pairs: &[(&str, &str)]) -> FileBatch {
        FileBatch {
            file: "sample.txt".to_string(),
            records: pairs
                .iter()
                .enumerate()
                .map(|(i, (sample_id, case_id))| {
                    Record::new("sample.txt", i as u64 + 2, "sample")
                        .with_property("sample_id", sample_id)
                        .with_parent("case.case_id", case_id)
                })
                .collect(),
        }
    }

    fn id(node_type: &str, signature: &str) -> NodeId {
        IdentityAssigner::new(DOMAIN).assign(node_type, signature)
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);
        let batches = vec![cases(&["C1", "C2"]), samples(&[("S1", "C1"), ("S2", "C2")])];

        let first = engine.load(&batches, LoadMode::Upsert).await;
        assert_eq!(first.counts.nodes_created, 4);
        assert_eq!(first.counts.relationships_created, 2);
        assert_eq!(first.files_loaded, vec!["case.txt", "sample.txt"]);

        let second = engine.load(&batches, LoadMode::Upsert).await;
        assert_eq!(second.counts.nodes_created, 0);
        assert_eq!(second.counts.nodes_updated, 4);
        assert_eq!(second.counts.relationships_created, 0);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.relationship_count(), 2);

        let c1 = graph.node(&id("case", "C1")).unwrap();
        assert_eq!(c1.properties["age"], PropertyValue::Integer(40));
    }

    #[tokio::test]
    async fn test_upsert_replaces_changed_parent() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        engine.load(&[cases(&["C1", "C2"]), samples(&[("S1", "C1")])], LoadMode::Upsert).await;
        let report = engine.load(&[samples(&[("S1", "C2")])], LoadMode::Upsert).await;

        assert_eq!(report.counts.relationships_deleted, 1);
        assert_eq!(report.counts.relationships_created, 1);
        let s1 = id("sample", "S1");
        assert!(graph.has_relationship("of_case", &s1, &id("case", "C2")));
        assert!(!graph.has_relationship("of_case", &s1, &id("case", "C1")));
    }

    #[tokio::test]
    async fn test_new_mode_conflicts_roll_back_file() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        engine.load(&[cases(&["C1"])], LoadMode::New).await;

        let report = engine
            .load(&[cases(&["C1", "C3"]), samples(&[("S1", "C1")])], LoadMode::New)
            .await;

        assert_eq!(report.failed_files.len(), 1);
        assert_eq!(report.failed_files[0].file, "case.txt");
        assert!(report.failed_files[0].reason.contains("1 node(s) already exist"));
        // C3 was rolled back with its file; the sample file still loaded.
        assert!(graph.node(&id("case", "C3")).is_none());
        assert_eq!(report.files_loaded, vec!["sample.txt"]);
        assert_eq!(graph.count_label("case"), 1);
        assert_eq!(graph.count_label("sample"), 1);
    }

    #[tokio::test]
    async fn test_new_mode_repeated_row_is_not_a_conflict() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        let report = engine.load(&[cases(&["C1", "C1"])], LoadMode::New).await;
        assert!(report.is_success());
        assert_eq!(report.counts.nodes_created, 1);
        assert_eq!(report.counts.nodes_updated, 1);
    }

    #[tokio::test]
    async fn test_unresolved_reference_rolls_back_file() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        let report = engine.load(&[samples(&[("S1", "C404")])], LoadMode::Upsert).await;
        assert_eq!(report.failed_files.len(), 1);
        assert!(report.failed_files[0].reason.contains("case.case_id = 'C404'"));
        assert_eq!(graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_reference_resolves_against_store() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        engine.load(&[cases(&["C1"])], LoadMode::Upsert).await;
        let report = engine.load(&[samples(&[("S1", "C1")])], LoadMode::Upsert).await;

        assert_eq!(report.counts.nodes_created, 1);
        assert_eq!(report.counts.relationships_created, 1);
        assert_eq!(graph.count_label("case"), 1);
    }

    #[tokio::test]
    async fn test_reference_by_non_identifying_property() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        let visit = FileBatch {
            file: "visit.txt".to_string(),
            records: vec![Record::new("visit.txt", 2, "visit")
                .with_property("visit_date", "2024-01-01")
                .with_parent("case.age", "40")],
        };
        engine.load(&[cases(&["C1"])], LoadMode::Upsert).await;
        let report = engine.load(&[visit], LoadMode::Upsert).await;

        assert!(report.is_success(), "{:?}", report.failed_files);
        assert_eq!(report.counts.relationships_created, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_nodes_and_relationships() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config);

        engine
            .load(&[cases(&["C1"]), samples(&[("S1", "C1"), ("S2", "C1")])], LoadMode::Upsert)
            .await;

        let report = engine.load(&[samples(&[("S1", "C1"), ("S9", "C1")])], LoadMode::Delete).await;
        assert_eq!(report.counts.nodes_deleted, 1);
        assert_eq!(report.counts.relationships_deleted, 1);
        assert_eq!(graph.count_label("sample"), 1);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[tokio::test]
    async fn test_cheat_mode_stores_unconvertible_values_as_text() {
        let graph = MemoryGraph::new();
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&graph, &schema, &config).with_cheat_mode(true);

        let batch = FileBatch {
            file: "case.txt".to_string(),
            records: vec![Record::new("case.txt", 2, "case")
                .with_property("case_id", "C1")
                .with_property("age", "unknown")],
        };
        engine.load(&[batch], LoadMode::Upsert).await;

        let c1 = graph.node(&id("case", "C1")).unwrap();
        assert_eq!(c1.properties["age"], PropertyValue::from("unknown"));
    }

    /// Fails `begin` once `healthy` transactions have been handed out.
    struct FailingStore {
        inner: MemoryGraph,
        healthy: usize,
        begun: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for FailingStore {
        type Txn = <MemoryGraph as GraphStore>::Txn;

        async fn begin(&self) -> Result<Self::Txn, GraphError> {
            if self.begun.fetch_add(1, Ordering::SeqCst) >= self.healthy {
                return Err(GraphError::Connection("connection reset by peer".to_string()));
            }
            self.inner.begin().await
        }

        async fn wipe(&self) -> Result<u64, GraphError> {
            self.inner.wipe().await
        }
    }

    #[tokio::test]
    async fn test_store_failure_keeps_committed_counts() {
        let store = FailingStore {
            inner: MemoryGraph::new(),
            healthy: 1,
            begun: AtomicUsize::new(0),
        };
        let schema = test_schema();
        let config = config();
        let engine = LoadEngine::new(&store, &schema, &config);

        let visits = FileBatch {
            file: "visit.txt".to_string(),
            records: vec![Record::new("visit.txt", 2, "visit").with_property("visit_date", "2024-01-01")],
        };
        let report = engine
            .load(&[cases(&["C1", "C2"]), samples(&[("S1", "C1")]), visits], LoadMode::Upsert)
            .await;

        assert!(!report.is_success());
        assert_eq!(report.files_loaded, vec!["case.txt"]);
        assert_eq!(report.counts.nodes_created, 2);
        assert!(report.failed_files.is_empty());
        let aborted = report.aborted.as_ref().expect("run aborted");
        assert_eq!(aborted.file, "sample.txt");
        assert!(aborted.reason.contains("connection reset"));
        assert_eq!(report.files_skipped, vec!["visit.txt"]);

        // The first file stays committed.
        assert_eq!(store.inner.count_label("case"), 2);
        assert_eq!(store.inner.count_label("sample"), 0);
        assert_eq!(store.begun.load(Ordering::SeqCst), 2);
    }
}
