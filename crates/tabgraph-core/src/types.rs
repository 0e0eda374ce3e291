//! Graph value types shared by the loader and the store backends.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identity ──────────────────────────────────────────────────────

/// Deterministic identity of a node in the graph.
///
/// Stored on every node as the `uuid` property.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Property Values ───────────────────────────────────────────────

/// A scalar property value after conversion to its declared type.
///
/// Dates and timestamps are checked on the way in but kept in their
/// textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

// ── Write Requests ────────────────────────────────────────────────

/// A node to create, merge, or delete, addressed by label and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWrite {
    pub label: String,
    pub id: NodeId,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A directed relationship between two nodes that already exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipWrite {
    pub rel_type: String,
    pub source_label: String,
    pub source_id: NodeId,
    pub target_label: String,
    pub target_id: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_display() {
        assert_eq!(PropertyValue::from("C1").to_string(), "C1");
        assert_eq!(PropertyValue::from(42_i64).to_string(), "42");
        assert_eq!(PropertyValue::from(true).to_string(), "true");
        assert_eq!(PropertyValue::from(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_property_value_serializes_untagged() {
        let json = serde_json::to_string(&PropertyValue::Integer(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&PropertyValue::from("x")).unwrap();
        assert_eq!(json, "\"x\"");
    }

    #[test]
    fn test_as_str_only_for_strings() {
        assert_eq!(PropertyValue::from("a").as_str(), Some("a"));
        assert_eq!(PropertyValue::Boolean(false).as_str(), None);
    }
}
