//! Batch validation against the schema.
//!
//! Violations are accumulated, never raised. The kept list is capped at
//! `max_violations`, but every violation is counted so the summary stays
//! accurate. Input records are never modified.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use tabgraph_core::{NodeId, Violation};

use crate::config::{LoaderConfig, ReferencePolicy};
use crate::record::{ParentRef, Record};
use crate::schema::{Multiplier, PropertyDef, RelationshipEnd, Schema};

/// Outcome of validating one batch.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    /// At most `max_violations` entries, in discovery order.
    pub violations: Vec<Violation>,
    pub error_count: usize,
    pub warning_count: usize,
    pub records_checked: usize,
    max: usize,
}

impl ValidationSummary {
    fn new(max: usize) -> Self {
        Self {
            max,
            ..Default::default()
        }
    }

    fn push(&mut self, violation: Violation) {
        if violation.is_error() {
            self.error_count += 1;
        } else {
            self.warning_count += 1;
        }
        if self.violations.len() < self.max {
            self.violations.push(violation);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn total(&self) -> usize {
        self.error_count + self.warning_count
    }

    /// Whether violations were dropped from the list by the cap.
    pub fn is_truncated(&self) -> bool {
        self.total() > self.violations.len()
    }
}

/// Where a referenced node is defined in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetSite {
    id: NodeId,
    file_index: usize,
}

/// (node type, field, value) → distinct nodes carrying that value.
type TargetIndex<'r> = HashMap<(&'r str, &'r str, &'r str), Vec<TargetSite>>;

pub struct Validator<'a> {
    schema: &'a Schema,
    config: &'a LoaderConfig,
    check_references: bool,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a Schema, config: &'a LoaderConfig) -> Self {
        Self {
            schema,
            config,
            check_references: true,
        }
    }

    /// Skip reference resolution and cardinality, e.g. for deletes, which
    /// never follow parent pointers.
    pub fn skip_references(mut self, skip: bool) -> Self {
        self.check_references = !skip;
        self
    }

    /// Check a whole batch. Records are expected to carry identities;
    /// cross-record checks skip records that do not.
    pub fn validate(&self, records: &[Record], max_violations: usize) -> ValidationSummary {
        let mut summary = ValidationSummary::new(max_violations);
        let file_order = file_order(records);

        for record in records {
            self.check_record(record, &mut summary);
        }

        if self.check_references {
            let index = self.build_index(records, &file_order);
            self.check_references(records, &index, &file_order, &mut summary);
        }
        self.check_duplicates(records, &mut summary);

        summary.records_checked = records.len();
        tracing::info!(
            records = summary.records_checked,
            errors = summary.error_count,
            warnings = summary.warning_count,
            "Validation finished"
        );
        summary
    }

    // ── Per Record ───────────────────────────────────────────────

    fn check_record(&self, record: &Record, summary: &mut ValidationSummary) {
        let Some(node_type) = self.schema.node_type(&record.node_type) else {
            summary.push(Violation::error(
                &record.file,
                record.line,
                format!("node type '{}' is not declared", record.node_type),
            ));
            return;
        };

        for def in node_type.required_properties() {
            if !record.properties.contains_key(&def.name) {
                summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!("required property '{}' is missing", def.name),
                    )
                    .with_field(&def.name),
                );
            }
        }

        for id in &node_type.id_properties {
            let required = node_type.property(id).is_some_and(|p| p.required);
            if !required && !record.properties.contains_key(id) {
                summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!("identifying property '{id}' is missing"),
                    )
                    .with_field(id),
                );
            }
        }

        for (name, raw) in &record.properties {
            match node_type.property(name) {
                Some(def) => {
                    if let Err(reason) = def.property_type.convert(raw) {
                        summary.push(
                            Violation::error(
                                &record.file,
                                record.line,
                                format!("invalid value for '{name}': {reason}"),
                            )
                            .with_field(name),
                        );
                    }
                }
                None => summary.push(
                    Violation::warning(
                        &record.file,
                        record.line,
                        format!(
                            "property '{name}' is not declared on node type '{}' and will be stored as text",
                            record.node_type
                        ),
                    )
                    .with_field(name),
                ),
            }
        }

        for parent in &record.parents {
            let field = parent.pointer.to_string();
            let target = &parent.pointer.node_type;
            if self
                .schema
                .relationship_between(&record.node_type, target)
                .is_none()
            {
                summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!(
                            "no relationship from '{}' to '{target}' is declared",
                            record.node_type
                        ),
                    )
                    .with_field(&field),
                );
                continue;
            }
            match self.target_property(parent) {
                None => summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!(
                            "node type '{target}' has no property '{}'",
                            parent.pointer.field
                        ),
                    )
                    .with_field(&field),
                ),
                Some(def) => {
                    if let Err(reason) = def.property_type.convert(&parent.value) {
                        summary.push(
                            Violation::error(
                                &record.file,
                                record.line,
                                format!("invalid reference value: {reason}"),
                            )
                            .with_field(&field),
                        );
                    }
                }
            }
        }
    }

    fn target_property(&self, parent: &ParentRef) -> Option<&'a PropertyDef> {
        self.schema
            .node_type(&parent.pointer.node_type)?
            .property(&parent.pointer.field)
    }

    /// The relationship rule a parent reference follows, when it is well formed.
    fn rule_for(&self, record: &Record, parent: &ParentRef) -> Option<&'a RelationshipEnd> {
        self.target_property(parent)?;
        self.schema
            .relationship_between(&record.node_type, &parent.pointer.node_type)
    }

    // ── Across The Batch ─────────────────────────────────────────

    fn build_index<'r>(
        &self,
        records: &'r [Record],
        file_order: &BTreeMap<&str, usize>,
    ) -> TargetIndex<'r> {
        let referenced: std::collections::HashSet<(&str, &str)> = records
            .iter()
            .flat_map(|r| r.parents.iter())
            .map(|p| (p.pointer.node_type.as_str(), p.pointer.field.as_str()))
            .collect();

        let mut index: TargetIndex<'r> = HashMap::new();
        for record in records {
            let Some(id) = record.id() else { continue };
            let file_index = file_order.get(record.file.as_str()).copied().unwrap_or(0);
            for (name, value) in &record.properties {
                if !referenced.contains(&(record.node_type.as_str(), name.as_str())) {
                    continue;
                }
                let sites = index
                    .entry((record.node_type.as_str(), name.as_str(), value.as_str()))
                    .or_default();
                if !sites.iter().any(|s| s.id == id) {
                    sites.push(TargetSite { id, file_index });
                }
            }
        }
        index
    }

    fn check_references(
        &self,
        records: &[Record],
        index: &TargetIndex<'_>,
        file_order: &BTreeMap<&str, usize>,
        summary: &mut ValidationSummary,
    ) {
        // (relationship, source, target type) → first target seen.
        let mut targets_of: HashMap<(&str, NodeId, &str), NodeId> = HashMap::new();
        // (relationship, target) → first source seen, one_to_one only.
        let mut sources_of: HashMap<(&str, NodeId), NodeId> = HashMap::new();

        for record in records {
            let file_index = file_order.get(record.file.as_str()).copied().unwrap_or(0);
            for parent in &record.parents {
                let Some(rule) = self.rule_for(record, parent) else {
                    continue;
                };
                let field = parent.pointer.to_string();
                let key = (
                    parent.pointer.node_type.as_str(),
                    parent.pointer.field.as_str(),
                    parent.value.as_str(),
                );
                let sites = index.get(&key).map(Vec::as_slice).unwrap_or(&[]);

                let target = match sites {
                    [] => {
                        self.report_unresolved(record, parent, summary);
                        continue;
                    }
                    [site] => *site,
                    many => {
                        summary.push(
                            Violation::error(
                                &record.file,
                                record.line,
                                format!(
                                    "ambiguous reference: {} '{}' nodes have {} = '{}'",
                                    many.len(),
                                    parent.pointer.node_type,
                                    parent.pointer.field,
                                    parent.value
                                ),
                            )
                            .with_field(&field),
                        );
                        continue;
                    }
                };

                if target.file_index > file_index {
                    summary.push(
                        Violation::error(
                            &record.file,
                            record.line,
                            format!(
                                "referenced {} '{}' is defined in a later file; files are loaded in order",
                                parent.pointer.node_type, parent.value
                            ),
                        )
                        .with_field(&field),
                    );
                }

                let Some(source) = record.id() else { continue };
                self.check_cardinality(
                    record,
                    parent,
                    rule,
                    source,
                    target.id,
                    &mut targets_of,
                    &mut sources_of,
                    summary,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_cardinality<'r>(
        &self,
        record: &'r Record,
        parent: &'r ParentRef,
        rule: &'r RelationshipEnd,
        source: NodeId,
        target: NodeId,
        targets_of: &mut HashMap<(&'r str, NodeId, &'r str), NodeId>,
        sources_of: &mut HashMap<(&'r str, NodeId), NodeId>,
        summary: &mut ValidationSummary,
    ) {
        let field = parent.pointer.to_string();

        match targets_of.entry((
            rule.relationship.as_str(),
            source,
            parent.pointer.node_type.as_str(),
        )) {
            Entry::Vacant(e) => {
                e.insert(target);
            }
            Entry::Occupied(e) if *e.get() != target => {
                summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!(
                            "{} '{}' already references a different {} through '{}' ({}); only one is allowed",
                            record.node_type,
                            record.signature().unwrap_or_default(),
                            parent.pointer.node_type,
                            rule.relationship,
                            rule.multiplier
                        ),
                    )
                    .with_field(&field),
                );
            }
            Entry::Occupied(_) => {}
        }

        if rule.multiplier != Multiplier::OneToOne {
            return;
        }
        match sources_of.entry((rule.relationship.as_str(), target)) {
            Entry::Vacant(e) => {
                e.insert(source);
            }
            Entry::Occupied(e) if *e.get() != source => {
                summary.push(
                    Violation::error(
                        &record.file,
                        record.line,
                        format!(
                            "{} '{}' is already referenced through one_to_one '{}' by another {}",
                            parent.pointer.node_type,
                            parent.value,
                            rule.relationship,
                            record.node_type
                        ),
                    )
                    .with_field(&field),
                );
            }
            Entry::Occupied(_) => {}
        }
    }

    fn report_unresolved(&self, record: &Record, parent: &ParentRef, summary: &mut ValidationSummary) {
        let target = &parent.pointer.node_type;
        if self.config.is_external(target) {
            return;
        }
        let field = parent.pointer.to_string();
        let violation = match self.config.reference_policy {
            ReferencePolicy::Batch => Violation::error(
                &record.file,
                record.line,
                format!(
                    "unresolved reference: no {target} with {} = '{}' in this batch",
                    parent.pointer.field, parent.value
                ),
            ),
            ReferencePolicy::AllowExternal => Violation::warning(
                &record.file,
                record.line,
                format!(
                    "{target} with {} = '{}' is not in this batch and must already exist in the graph",
                    parent.pointer.field, parent.value
                ),
            ),
        };
        summary.push(violation.with_field(&field));
    }

    fn check_duplicates(&self, records: &[Record], summary: &mut ValidationSummary) {
        let mut first_seen: HashMap<NodeId, &Record> = HashMap::new();
        for record in records {
            let Some(id) = record.id() else { continue };
            match first_seen.entry(id) {
                Entry::Vacant(e) => {
                    e.insert(record);
                }
                Entry::Occupied(e) => {
                    let first = *e.get();
                    if first.properties != record.properties {
                        summary.push(Violation::warning(
                            &record.file,
                            record.line,
                            format!(
                                "{} '{}' duplicates {}:{} with different values; the last row wins",
                                record.node_type,
                                record.signature().unwrap_or_default(),
                                first.file,
                                first.line
                            ),
                        ));
                    }
                }
            }
        }
    }
}

/// Position of each file in the batch, by first appearance.
fn file_order(records: &[Record]) -> BTreeMap<&str, usize> {
    let mut order = BTreeMap::new();
    for record in records {
        let next = order.len();
        order.entry(record.file.as_str()).or_insert(next);
    }
    order
}
