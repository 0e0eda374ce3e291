//! Parsed rows and parent pointers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use tabgraph_core::NodeId;

/// A `Type.field` column: a reference to the node of `node_type` whose
/// `field` equals the cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParentPointer {
    pub node_type: String,
    pub field: String,
}

impl ParentPointer {
    /// Recognise a header cell of the form `word.word`.
    pub fn parse(header: &str) -> Option<Self> {
        static POINTER: OnceLock<Regex> = OnceLock::new();
        let re = POINTER.get_or_init(|| Regex::new(r"^(\w+)\.(\w+)$").expect("valid pointer regex"));
        let caps = re.captures(header)?;
        Some(Self {
            node_type: caps[1].to_string(),
            field: caps[2].to_string(),
        })
    }
}

impl fmt::Display for ParentPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_type, self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub pointer: ParentPointer,
    pub value: String,
}

/// Deterministic identity of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: NodeId,
    pub signature: String,
}

/// One data row.
///
/// Values are kept as trimmed text; typed conversion happens in the
/// validator and the load engine. Empty cells are absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub file: String,
    /// 1-based line in the source file.
    pub line: u64,
    pub node_type: String,
    pub properties: BTreeMap<String, String>,
    pub parents: Vec<ParentRef>,
    pub identity: Option<Identity>,
}

impl Record {
    pub fn new(file: &str, line: u64, node_type: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            node_type: node_type.to_string(),
            properties: BTreeMap::new(),
            parents: Vec::new(),
            identity: None,
        }
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a parent reference; `pointer` must be `Type.field`.
    pub fn with_parent(mut self, pointer: &str, value: &str) -> Self {
        if let Some(pointer) = ParentPointer::parse(pointer) {
            self.parents.push(ParentRef {
                pointer,
                value: value.to_string(),
            });
        }
        self
    }

    pub fn id(&self) -> Option<NodeId> {
        self.identity.as_ref().map(|i| i.id)
    }

    pub fn signature(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.signature.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_pointer_syntax() {
        let p = ParentPointer::parse("case.case_id").unwrap();
        assert_eq!(p.node_type, "case");
        assert_eq!(p.field, "case_id");
        assert_eq!(p.to_string(), "case.case_id");

        assert!(ParentPointer::parse("case_id").is_none());
        assert!(ParentPointer::parse("a.b.c").is_none());
        assert!(ParentPointer::parse(".case_id").is_none());
        assert!(ParentPointer::parse("case.").is_none());
        assert!(ParentPointer::parse("my case.id").is_none());
    }

    #[test]
    fn test_builder_ignores_malformed_pointer() {
        let record = Record::new("sample.txt", 2, "sample")
            .with_property("sample_id", "S1")
            .with_parent("case.case_id", "C1")
            .with_parent("not a pointer", "x");
        assert_eq!(record.parents.len(), 1);
        assert_eq!(record.properties["sample_id"], "S1");
        assert!(record.id().is_none());
    }
}
