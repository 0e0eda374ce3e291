//! Configuration for the tabgraph loader.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{LoaderError, Result};
use crate::schema::Schema;

/// Loader configuration.
///
/// Loaded from the `[loader]` section of `tabgraph.toml` or
/// `TABGRAPH__LOADER__*` environment variables. Built once at startup and
/// passed by reference; nothing re-reads the environment during a run.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Administrative domain that roots every node identity.
    #[serde(default)]
    pub domain: String,

    /// Glob used when an input path is a directory (default: "*.txt").
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Field delimiter of the input files (default: tab).
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Column naming the node type of a row (default: "type").
    #[serde(default = "default_type_column")]
    pub type_column: String,

    /// Explicit file name (or stem) → node type mapping.
    #[serde(default)]
    pub file_types: BTreeMap<String, String>,

    /// Maximum number of violations kept for reporting.
    #[serde(default = "default_max_violations")]
    pub max_violations: usize,

    /// How parent references outside the current batch are treated.
    #[serde(default)]
    pub reference_policy: ReferencePolicy,

    /// Target node types that are always resolved against the store.
    #[serde(default)]
    pub external_types: Vec<String>,

    #[serde(default)]
    pub backup: BackupConfig,
}

/// Resolution policy for parent references whose target is not in the batch.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Unresolved references are errors.
    #[default]
    Batch,
    /// Unresolved references are warnings and are looked up in the store
    /// when loading.
    AllowExternal,
}

/// External backup hook run before anything is written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupConfig {
    /// Program and arguments. `{name}` is replaced by a timestamped backup name.
    #[serde(default)]
    pub command: Vec<String>,

    /// Printed after the run so an operator knows how to restore.
    #[serde(default)]
    pub restore_hint: Option<String>,
}

impl BackupConfig {
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

impl LoaderConfig {
    /// Reject configurations the loader cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(LoaderError::Config(
                "loader.domain is required: it roots every node identity".to_string(),
            ));
        }
        if !self.delimiter.is_ascii() {
            return Err(LoaderError::Config(format!(
                "loader.delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        if self.type_column.is_empty() {
            return Err(LoaderError::Config(
                "loader.type_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The type column must not shadow a declared property, or that
    /// property could never be read from a file.
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        for node_type in schema.node_types() {
            if node_type.property(&self.type_column).is_some() {
                return Err(LoaderError::Config(format!(
                    "loader.type_column '{}' is also a property of node type '{}'; \
                     rename one of them",
                    self.type_column, node_type.name
                )));
            }
        }
        Ok(())
    }

    /// Delimiter as the byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        let mut buf = [0u8; 4];
        self.delimiter.encode_utf8(&mut buf);
        buf[0]
    }

    /// Whether references to `node_type` may resolve outside the batch.
    pub fn is_external(&self, node_type: &str) -> bool {
        self.external_types.iter().any(|t| t == node_type)
    }

    /// Explicitly mapped node type for a file, by full name first, then stem.
    pub fn mapped_type(&self, file_name: &str, stem: &str) -> Option<&str> {
        self.file_types
            .get(file_name)
            .or_else(|| self.file_types.get(stem))
            .map(String::as_str)
    }
}

fn default_file_pattern() -> String {
    "*.txt".to_string()
}

fn default_delimiter() -> char {
    '\t'
}

fn default_type_column() -> String {
    "type".to_string()
}

fn default_max_violations() -> usize {
    10
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            file_pattern: default_file_pattern(),
            delimiter: default_delimiter(),
            type_column: default_type_column(),
            file_types: BTreeMap::new(),
            max_violations: default_max_violations(),
            reference_policy: ReferencePolicy::default(),
            external_types: Vec::new(),
            backup: BackupConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.file_pattern, "*.txt");
        assert_eq!(config.delimiter, '\t');
        assert_eq!(config.delimiter_byte(), b'\t');
        assert_eq!(config.type_column, "type");
        assert_eq!(config.max_violations, 10);
        assert_eq!(config.reference_policy, ReferencePolicy::Batch);
        assert!(!config.backup.is_configured());
    }

    #[test]
    fn test_validate_requires_domain() {
        let mut config = LoaderConfig::default();
        assert!(matches!(config.validate(), Err(LoaderError::Config(_))));

        config.domain = "research.example.org".to_string();
        assert!(config.validate().is_ok());

        config.delimiter = '§';
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_type_column_must_not_shadow_property() {
        let schema = Schema::from_sources(&[(
            "m.yml",
            "Nodes:\n  specimen:\n    Props: [specimen_id, type]\n    Id: specimen_id\n",
        )])
        .unwrap();
        let mut config = LoaderConfig {
            domain: "research.example.org".to_string(),
            ..Default::default()
        };
        let err = config.check_schema(&schema).unwrap_err();
        assert!(err.to_string().contains("specimen"), "{err}");

        config.type_column = "node_type".to_string();
        assert!(config.check_schema(&schema).is_ok());
    }

    #[test]
    fn test_deserialize_from_toml_source() {
        let toml = r#"
[loader]
domain = "research.example.org"
delimiter = ","
max_violations = 3
reference_policy = "allow_external"
external_types = ["program"]

[loader.file_types]
samples_2024 = "sample"

[loader.backup]
command = ["backup.sh", "{name}"]
restore_hint = "restore.sh <name>"
"#;
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let loader: LoaderConfig = cfg.get("loader").unwrap();

        assert_eq!(loader.delimiter_byte(), b',');
        assert_eq!(loader.max_violations, 3);
        assert_eq!(loader.reference_policy, ReferencePolicy::AllowExternal);
        assert!(loader.is_external("program"));
        assert!(!loader.is_external("case"));
        assert_eq!(
            loader.mapped_type("samples_2024.txt", "samples_2024"),
            Some("sample")
        );
        assert_eq!(loader.mapped_type("case.txt", "case"), None);
        assert!(loader.backup.is_configured());
        assert_eq!(loader.file_pattern, "*.txt");
    }
}
