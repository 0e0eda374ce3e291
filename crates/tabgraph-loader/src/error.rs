//! Error types for the tabgraph-loader crate.

use std::fmt;

use thiserror::Error;

use tabgraph_core::NodeId;
use tabgraph_graph::GraphError;

use crate::schema::SchemaError;

/// A malformed input file. Fatal for the run; nothing from the file is loaded.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to open {file}: {source}")]
    Io {
        file: String,
        source: std::io::Error,
    },

    #[error("{file}:{line}: unreadable row: {source}")]
    Csv {
        file: String,
        line: u64,
        source: csv::Error,
    },

    #[error("{file}: missing or empty header row")]
    EmptyHeader { file: String },

    #[error("{file}: column '{column}' appears more than once")]
    DuplicateColumn { file: String, column: String },

    #[error("{file}: invalid column name '{column}'")]
    InvalidColumn { file: String, column: String },

    #[error("{file}: node type '{node_type}' is not declared in the schema")]
    UnknownNodeType { file: String, node_type: String },

    #[error("{file}:{line}: node type '{found}' differs from '{expected}' used earlier in the file")]
    InconsistentType {
        file: String,
        line: u64,
        expected: String,
        found: String,
    },
}

/// An existing node hit by a `new` mode load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConflict {
    pub line: u64,
    pub node_type: String,
    pub signature: String,
    pub id: NodeId,
}

impl fmt::Display for NodeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {} '{}' ({})",
            self.line, self.node_type, self.signature, self.id
        )
    }
}

/// A parent reference that matched no node when loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub line: u64,
    pub pointer: String,
    pub value: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} = '{}'", self.line, self.pointer, self.value)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure while committing one file. The file's transaction is rolled back.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Store failure while loading {file}: {source}")]
    Store { file: String, source: GraphError },

    #[error("{file}: {} node(s) already exist: {}", .conflicts.len(), join(.conflicts))]
    Conflict {
        file: String,
        conflicts: Vec<NodeConflict>,
    },

    #[error("{file}: unresolved parent reference(s): {}", join(.references))]
    Unresolved {
        file: String,
        references: Vec<UnresolvedReference>,
    },
}

impl LoadError {
    pub fn file(&self) -> &str {
        match self {
            Self::Store { file, .. } | Self::Conflict { file, .. } | Self::Unresolved { file, .. } => {
                file
            }
        }
    }

    /// Record-level failures are confined to their file; the run goes on.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unresolved { .. })
    }
}

/// Run-level error.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Backup command '{program}' could not be started: {reason}")]
    BackupSpawn { program: String, reason: String },

    #[error("Backup command exited with code {code}: {stderr}")]
    BackupFailed { code: i32, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
