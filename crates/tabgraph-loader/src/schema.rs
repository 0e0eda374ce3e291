//! Schema model: node types, property definitions and relationship rules.
//!
//! Schema sources are YAML documents with three top-level maps:
//!
//! ```yaml
//! Nodes:
//!   case:
//!     Props: [case_id, age]
//!     Id: case_id
//! Relationships:
//!   of_case:
//!     Mul: many_to_one
//!     Ends:
//!       - Src: sample
//!         Dst: case
//! PropDefinitions:
//!   case_id:
//!     Type: String
//!     Req: true
//! ```
//!
//! Several sources are merged into one [`Schema`]. Redefining a type is
//! allowed only when the definitions agree.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;

use tabgraph_core::PropertyValue;

/// Property names the loader writes itself.
const RESERVED_PROPERTIES: &[&str] = &["uuid", "created", "updated"];

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("No schema sources given")]
    NoSources,

    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid schema YAML in {origin}: {source}")]
    Yaml {
        origin: String,
        source: serde_yaml::Error,
    },

    #[error("Conflicting definitions of {kind} '{name}' in {origin}")]
    Conflict {
        kind: &'static str,
        name: String,
        origin: String,
    },

    #[error("Relationship '{relationship}' references undeclared node type '{node_type}'")]
    UndeclaredNodeType {
        relationship: String,
        node_type: String,
    },

    #[error("Relationships '{first}' and '{second}' both connect {from_type} -> {to_type}")]
    AmbiguousRelationship {
        first: String,
        second: String,
        from_type: String,
        to_type: String,
    },

    #[error("Node type '{node_type}' declares identifying property '{property}' it does not have")]
    UnknownIdProperty { node_type: String, property: String },

    #[error("Property '{property}' has unknown type '{type_name}'")]
    UnknownType { property: String, type_name: String },

    #[error("Invalid name '{0}': only letters, digits and underscores are allowed")]
    InvalidName(String),

    #[error("Property name '{0}' is reserved by the loader")]
    ReservedName(String),
}

// ── Model ─────────────────────────────────────────────────────────

/// Declared type of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS`
    DateTime,
    /// One of a fixed list of string values.
    Enum(Vec<String>),
}

impl PropertyType {
    fn from_name(property: &str, name: &str) -> Result<Self, SchemaError> {
        match name.trim().to_lowercase().as_str() {
            "string" | "str" => Ok(Self::String),
            "int" | "integer" => Ok(Self::Integer),
            "float" | "number" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "datetime" => Ok(Self::DateTime),
            _ => Err(SchemaError::UnknownType {
                property: property.to_string(),
                type_name: name.to_string(),
            }),
        }
    }

    /// Convert a raw cell value to this type.
    ///
    /// The error is a human-readable reason suitable for a violation message.
    pub fn convert(&self, raw: &str) -> Result<PropertyValue, String> {
        match self {
            Self::String => Ok(PropertyValue::from(raw)),
            Self::Integer => raw
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .map_err(|_| format!("'{raw}' is not an integer")),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(PropertyValue::Float)
                .ok_or_else(|| format!("'{raw}' is not a number")),
            Self::Boolean => match raw.to_lowercase().as_str() {
                "true" | "yes" => Ok(PropertyValue::Boolean(true)),
                "false" | "no" => Ok(PropertyValue::Boolean(false)),
                _ => Err(format!("'{raw}' is not a boolean (true/false/yes/no)")),
            },
            Self::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|_| PropertyValue::from(raw))
                .map_err(|_| format!("'{raw}' is not a date (YYYY-MM-DD)")),
            Self::DateTime => {
                let valid = DateTime::parse_from_rfc3339(raw).is_ok()
                    || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok();
                if valid {
                    Ok(PropertyValue::from(raw))
                } else {
                    Err(format!("'{raw}' is not a timestamp"))
                }
            }
            Self::Enum(values) => {
                if values.iter().any(|v| v == raw) {
                    Ok(PropertyValue::from(raw))
                } else {
                    Err(format!("'{raw}' is not one of: {}", values.join(", ")))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub property_type: PropertyType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeType {
    pub name: String,
    /// In declaration order.
    pub properties: Vec<PropertyDef>,
    /// Properties whose values form the identity signature; empty means
    /// the whole record is the signature.
    pub id_properties: Vec<String>,
}

impl NodeType {
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.required)
    }
}

/// Cardinality rule of a relationship.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Multiplier {
    /// At most one target per source and one source per target.
    OneToOne,
    /// At most one target per source; a target may have many sources.
    #[default]
    ManyToOne,
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneToOne => f.write_str("one_to_one"),
            Self::ManyToOne => f.write_str("many_to_one"),
        }
    }
}

/// One source → target pair of a relationship type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEnd {
    pub relationship: String,
    pub source: String,
    pub target: String,
    pub multiplier: Multiplier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipType {
    pub name: String,
    pub ends: Vec<RelationshipEnd>,
}

/// The merged, immutable schema catalog.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    nodes: BTreeMap<String, NodeType>,
    relationships: BTreeMap<String, RelationshipType>,
    /// (source, target) → index into the owning relationship's ends.
    edges: BTreeMap<(String, String), (String, usize)>,
}

impl Schema {
    /// Load and merge schema files.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SchemaError> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.display().to_string(),
                source,
            })?;
            sources.push((path.display().to_string(), text));
        }
        let refs: Vec<(&str, &str)> = sources
            .iter()
            .map(|(origin, text)| (origin.as_str(), text.as_str()))
            .collect();
        Self::from_sources(&refs)
    }

    /// Merge `(origin, yaml)` sources. `origin` is only used in error messages.
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self, SchemaError> {
        if sources.is_empty() {
            return Err(SchemaError::NoSources);
        }

        let mut builder = SchemaBuilder::default();
        for (origin, text) in sources {
            let doc: SchemaDoc =
                serde_yaml::from_str(text).map_err(|source| SchemaError::Yaml {
                    origin: origin.to_string(),
                    source,
                })?;
            builder.merge(origin, doc)?;
        }
        let schema = builder.build()?;

        tracing::info!(
            node_types = schema.nodes.len(),
            relationship_types = schema.relationships.len(),
            sources = sources.len(),
            "Schema loaded"
        );
        Ok(schema)
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.nodes.get(name)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &NodeType> {
        self.nodes.values()
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipType> {
        self.relationships.get(name)
    }

    /// The relationship rule connecting `source` to `target`, if declared.
    pub fn relationship_between(&self, source: &str, target: &str) -> Option<&RelationshipEnd> {
        let (name, idx) = self
            .edges
            .get(&(source.to_string(), target.to_string()))?;
        self.relationships.get(name)?.ends.get(*idx)
    }

    /// Identifying property names of a node type; empty when the type has
    /// none and the full record is used as signature.
    pub fn id_properties(&self, node_type: &str) -> &[String] {
        self.nodes
            .get(node_type)
            .map(|n| n.id_properties.as_slice())
            .unwrap_or(&[])
    }
}

/// True when `name` is safe to use as a label, relationship type or
/// property key in generated Cypher.
pub fn is_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^\w+$").expect("valid identifier regex"))
        .is_match(name)
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

// ── YAML Documents ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SchemaDoc {
    #[serde(rename = "Nodes", default)]
    nodes: BTreeMap<String, Option<NodeDoc>>,
    #[serde(rename = "Relationships", default)]
    relationships: BTreeMap<String, RelationshipDoc>,
    #[serde(rename = "PropDefinitions", default)]
    prop_definitions: BTreeMap<String, Option<PropDoc>>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeDoc {
    #[serde(rename = "Props", default)]
    props: Option<Vec<String>>,
    #[serde(rename = "Id", default)]
    id: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RelationshipDoc {
    #[serde(rename = "Mul", default)]
    mul: Option<Multiplier>,
    #[serde(rename = "Ends", default)]
    ends: Vec<EndDoc>,
}

#[derive(Debug, Deserialize)]
struct EndDoc {
    #[serde(rename = "Src")]
    src: String,
    #[serde(rename = "Dst")]
    dst: String,
    #[serde(rename = "Mul", default)]
    mul: Option<Multiplier>,
}

#[derive(Debug, Default, Deserialize)]
struct PropDoc {
    #[serde(rename = "Type", default)]
    type_: Option<TypeDoc>,
    #[serde(rename = "Req", default)]
    req: bool,
    #[serde(rename = "Enum", default)]
    enum_values: Option<Vec<serde_yaml::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeDoc {
    Name(String),
    Values(Vec<serde_yaml::Value>),
}

fn scalar_strings(values: &[serde_yaml::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .collect()
}

// ── Merging ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclaredNode {
    props: Vec<String>,
    id: Vec<String>,
}

#[derive(Default)]
struct SchemaBuilder {
    props: BTreeMap<String, PropertyDef>,
    nodes: BTreeMap<String, DeclaredNode>,
    relationships: BTreeMap<String, RelationshipType>,
}

impl SchemaBuilder {
    fn merge(&mut self, origin: &str, doc: SchemaDoc) -> Result<(), SchemaError> {
        for (name, prop) in doc.prop_definitions {
            check_identifier(&name)?;
            let prop = prop.unwrap_or_default();
            let property_type = match (&prop.enum_values, &prop.type_) {
                (Some(values), _) | (None, Some(TypeDoc::Values(values))) => {
                    PropertyType::Enum(scalar_strings(values))
                }
                (None, Some(TypeDoc::Name(type_name))) => {
                    PropertyType::from_name(&name, type_name)?
                }
                (None, None) => PropertyType::String,
            };
            let def = PropertyDef {
                name: name.clone(),
                property_type,
                required: prop.req,
            };
            insert_agreeing(&mut self.props, name, def, "property", origin)?;
        }

        for (name, node) in doc.nodes {
            check_identifier(&name)?;
            let node = node.unwrap_or_default();
            let declared = DeclaredNode {
                props: node.props.unwrap_or_default(),
                id: match node.id {
                    None => Vec::new(),
                    Some(OneOrMany::One(id)) => vec![id],
                    Some(OneOrMany::Many(ids)) => ids,
                },
            };
            insert_agreeing(&mut self.nodes, name, declared, "node type", origin)?;
        }

        for (name, rel) in doc.relationships {
            check_identifier(&name)?;
            let default_mul = rel.mul.unwrap_or_default();
            let ends: Vec<RelationshipEnd> = rel
                .ends
                .into_iter()
                .map(|end| RelationshipEnd {
                    relationship: name.clone(),
                    source: end.src,
                    target: end.dst,
                    multiplier: end.mul.unwrap_or(default_mul),
                })
                .collect();

            let entry = self
                .relationships
                .entry(name.clone())
                .or_insert_with(|| RelationshipType {
                    name: name.clone(),
                    ends: Vec::new(),
                });
            for end in ends {
                match entry
                    .ends
                    .iter()
                    .find(|e| e.source == end.source && e.target == end.target)
                {
                    Some(existing) if existing.multiplier != end.multiplier => {
                        return Err(SchemaError::Conflict {
                            kind: "relationship",
                            name,
                            origin: origin.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => entry.ends.push(end),
                }
            }
        }

        Ok(())
    }

    fn build(self) -> Result<Schema, SchemaError> {
        let mut nodes = BTreeMap::new();
        for (name, declared) in self.nodes {
            let mut properties = Vec::with_capacity(declared.props.len());
            for prop in &declared.props {
                check_identifier(prop)?;
                if RESERVED_PROPERTIES.contains(&prop.as_str()) {
                    return Err(SchemaError::ReservedName(prop.clone()));
                }
                let def = match self.props.get(prop) {
                    Some(def) => def.clone(),
                    None => {
                        tracing::warn!(node_type = %name, property = %prop, "Property has no definition, treating as optional String");
                        PropertyDef {
                            name: prop.clone(),
                            property_type: PropertyType::String,
                            required: false,
                        }
                    }
                };
                properties.push(def);
            }

            for id in &declared.id {
                if !declared.props.contains(id) {
                    return Err(SchemaError::UnknownIdProperty {
                        node_type: name.clone(),
                        property: id.clone(),
                    });
                }
            }

            nodes.insert(
                name.clone(),
                NodeType {
                    name,
                    properties,
                    id_properties: declared.id,
                },
            );
        }

        let mut edges: BTreeMap<(String, String), (String, usize)> = BTreeMap::new();
        for rel in self.relationships.values() {
            for (idx, end) in rel.ends.iter().enumerate() {
                for node_type in [&end.source, &end.target] {
                    if !nodes.contains_key(node_type) {
                        return Err(SchemaError::UndeclaredNodeType {
                            relationship: rel.name.clone(),
                            node_type: node_type.clone(),
                        });
                    }
                }
                let key = (end.source.clone(), end.target.clone());
                if let Some((first, _)) = edges.get(&key) {
                    return Err(SchemaError::AmbiguousRelationship {
                        first: first.clone(),
                        second: rel.name.clone(),
                        from_type: end.source.clone(),
                        to_type: end.target.clone(),
                    });
                }
                edges.insert(key, (rel.name.clone(), idx));
            }
        }

        Ok(Schema {
            nodes,
            relationships: self.relationships,
            edges,
        })
    }
}

fn insert_agreeing<T: PartialEq>(
    map: &mut BTreeMap<String, T>,
    name: String,
    value: T,
    kind: &'static str,
    origin: &str,
) -> Result<(), SchemaError> {
    match map.get(&name) {
        Some(existing) if *existing != value => Err(SchemaError::Conflict {
            kind,
            name,
            origin: origin.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            map.insert(name, value);
            Ok(())
        }
    }
}
