//! Load modes, validation violations, and the per-run load report.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Load Mode ─────────────────────────────────────────────────────

/// Commit semantics applied to every file of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Create only; an identity already in the store is a conflict.
    New,
    /// Create when absent, otherwise merge properties (last write wins).
    #[default]
    Upsert,
    /// Remove matching nodes and their relationships.
    Delete,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Invalid mode: {s}. Choose: new, upsert, delete")),
        }
    }
}

// ── Violations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("WARNING"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// A recoverable integrity problem found during validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub severity: Severity,
    pub message: String,
    /// File name the offending record came from.
    pub file: String,
    /// 1-based line in the file, when the problem is tied to one row.
    pub line: Option<u64>,
    /// Column (property or parent pointer) involved, if any.
    pub field: Option<String>,
}

impl Violation {
    pub fn error(file: &str, line: u64, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: file.to_string(),
            line: Some(line),
            field: None,
        }
    }

    pub fn warning(file: &str, line: u64, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(file, line, message)
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " ({field})")?;
        }
        write!(f, ": {}", self.message)
    }
}

// ── Load Report ───────────────────────────────────────────────────

/// Store mutation counts, per file or accumulated over a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadCounts {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
}

impl LoadCounts {
    pub fn add(&mut self, other: &LoadCounts) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.nodes_deleted += other.nodes_deleted;
        self.relationships_created += other.relationships_created;
        self.relationships_deleted += other.relationships_deleted;
    }
}

/// A file whose changes were rolled back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

/// Outcome of one invocation: store counts plus the validation result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadReport {
    pub mode: LoadMode,
    pub counts: LoadCounts,
    /// Files committed, in processing order.
    pub files_loaded: Vec<String>,
    pub failed_files: Vec<FileFailure>,
    /// Store failure that ended the run early. Files committed before it
    /// stay committed and are counted above.
    #[serde(default)]
    pub aborted: Option<FileFailure>,
    /// Files never attempted because the run was aborted.
    #[serde(default)]
    pub files_skipped: Vec<String>,
    /// Reported violations, capped at the configured maximum.
    pub violations: Vec<Violation>,
    /// Total errors found, including those beyond the cap.
    pub error_count: usize,
    pub warning_count: usize,
}

impl LoadReport {
    pub fn new(mode: LoadMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// True when every file committed.
    pub fn is_success(&self) -> bool {
        self.failed_files.is_empty() && self.aborted.is_none()
    }

    pub fn summary(&self) -> String {
        let c = &self.counts;
        let mut summary = format!(
            "{} file(s) loaded, {} failed: {} node(s) created, {} updated, {} deleted; \
             {} relationship(s) created, {} deleted",
            self.files_loaded.len(),
            self.failed_files.len(),
            c.nodes_created,
            c.nodes_updated,
            c.nodes_deleted,
            c.relationships_created,
            c.relationships_deleted
        );
        if let Some(abort) = &self.aborted {
            summary.push_str(&format!(
                "; aborted at {} ({} file(s) not attempted): {}",
                abort.file,
                self.files_skipped.len(),
                abort.reason
            ));
        }
        summary
    }
}
