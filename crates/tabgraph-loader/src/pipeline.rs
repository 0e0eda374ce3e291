//! The run pipeline: parse → identify → validate → (wipe) → load.

use std::path::PathBuf;

use tabgraph_core::{LoadMode, LoadReport};
use tabgraph_graph::GraphStore;

use crate::config::LoaderConfig;
use crate::confirm::WipeConfirmed;
use crate::engine::{FileBatch, LoadEngine};
use crate::error::Result;
use crate::identity::IdentityAssigner;
use crate::parser::RecordSource;
use crate::schema::Schema;
use crate::validator::{ValidationSummary, Validator};

/// Per-invocation switches.
#[derive(Debug, Clone)]
pub struct RunFlags {
    pub mode: LoadMode,
    /// Skip validation entirely.
    pub cheat_mode: bool,
    /// Validate only; never touch the store.
    pub dry_run: bool,
    pub max_violations: usize,
}

impl RunFlags {
    pub fn new(mode: LoadMode, config: &LoaderConfig) -> Self {
        Self {
            mode,
            cheat_mode: false,
            dry_run: false,
            max_violations: config.max_violations,
        }
    }
}

/// Parsed, identified and (unless cheating) validated input.
#[derive(Debug)]
pub struct Prepared {
    batches: Vec<FileBatch>,
    validation: Option<ValidationSummary>,
}

impl Prepared {
    pub fn batches(&self) -> &[FileBatch] {
        &self.batches
    }

    /// `None` when validation was skipped.
    pub fn validation(&self) -> Option<&ValidationSummary> {
        self.validation.as_ref()
    }

    pub fn record_count(&self) -> usize {
        self.batches.iter().map(|b| b.records.len()).sum()
    }

    /// Validation ran and found errors.
    pub fn is_rejected(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.has_errors())
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Dry run: validated, nothing written.
    DryRun(ValidationSummary),
    /// Validation found errors; nothing written.
    Rejected(ValidationSummary),
    Loaded(LoadReport),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            Self::DryRun(_) => true,
            Self::Rejected(_) => false,
            Self::Loaded(report) => report.is_success(),
        }
    }
}

/// Drives one invocation. Parsing and validation need no store; only
/// [`Loader::load`] and [`Loader::run`] touch one.
pub struct Loader<'a> {
    schema: &'a Schema,
    config: &'a LoaderConfig,
}

impl<'a> Loader<'a> {
    pub fn new(schema: &'a Schema, config: &'a LoaderConfig) -> Self {
        Self { schema, config }
    }

    /// Parse every file, assign identities and validate the batch.
    ///
    /// A dry run always validates, even in cheat mode.
    pub fn prepare(&self, files: &[PathBuf], flags: &RunFlags) -> Result<Prepared> {
        self.config.check_schema(self.schema)?;
        let identities = IdentityAssigner::new(&self.config.domain);
        let mut batches = Vec::with_capacity(files.len());

        for path in files {
            let source = RecordSource::open(path, self.schema, self.config)?;
            let mut records = source.read_all()?;
            identities.identify_all(&mut records, self.schema);
            tracing::info!(
                file = %source.file(),
                node_type = %source.node_type(),
                records = records.len(),
                "Parsed input file"
            );
            batches.push(FileBatch {
                file: source.file().to_string(),
                records,
            });
        }

        let validation = if flags.cheat_mode && !flags.dry_run {
            tracing::warn!("Cheat mode: validation skipped, integrity checks are disabled");
            None
        } else {
            let records: Vec<_> = batches
                .iter()
                .flat_map(|b| b.records.iter().cloned())
                .collect();
            let validator = Validator::new(self.schema, self.config)
                .skip_references(flags.mode == LoadMode::Delete);
            Some(validator.validate(&records, flags.max_violations))
        };

        Ok(Prepared {
            batches,
            validation,
        })
    }

    /// Optionally wipe, then load the prepared batches.
    pub async fn load<S: GraphStore>(
        &self,
        store: &S,
        prepared: Prepared,
        flags: &RunFlags,
        wipe: Option<WipeConfirmed>,
    ) -> Result<LoadReport> {
        let engine = LoadEngine::new(store, self.schema, self.config)
            .with_cheat_mode(flags.cheat_mode);

        if let Some(confirmed) = wipe {
            engine.wipe(confirmed).await?;
        }

        let mut report = engine.load(&prepared.batches, flags.mode).await;
        if let Some(validation) = prepared.validation {
            report.error_count = validation.error_count;
            report.warning_count = validation.warning_count;
            report.violations = validation.violations;
        }
        Ok(report)
    }

    /// Prepare, then stop for dry runs and rejected batches, else load.
    pub async fn run<S: GraphStore>(
        &self,
        store: &S,
        files: &[PathBuf],
        flags: &RunFlags,
        wipe: Option<WipeConfirmed>,
    ) -> Result<RunOutcome> {
        let prepared = self.prepare(files, flags)?;

        if flags.dry_run {
            tracing::info!(records = prepared.record_count(), "Dry run: nothing will be written");
            return Ok(RunOutcome::DryRun(prepared.validation.unwrap_or_default()));
        }
        if prepared.is_rejected() {
            let validation = prepared.validation.unwrap_or_default();
            tracing::error!(errors = validation.error_count, "Validation failed, nothing loaded");
            return Ok(RunOutcome::Rejected(validation));
        }

        let report = self.load(store, prepared, flags, wipe).await?;
        Ok(RunOutcome::Loaded(report))
    }
}
