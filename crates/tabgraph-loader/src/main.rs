//! CLI entry point for the tabgraph loader.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, EnvFilter};

use tabgraph_core::LoadMode;
use tabgraph_graph::{GraphClient, GraphConfig};

use tabgraph_loader::backup;
use tabgraph_loader::confirm::confirm_wipe;
use tabgraph_loader::files::select_inputs;
use tabgraph_loader::pipeline::{Loader, RunFlags};
use tabgraph_loader::validator::ValidationSummary;
use tabgraph_loader::{LoaderConfig, Schema};

#[derive(Parser)]
#[command(name = "tabgraph-load")]
#[command(about = "Validate tabular extracts against a schema and load them into Neo4j")]
struct Cli {
    /// Input files or directories. Directories are expanded with
    /// `loader.file_pattern`.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Schema YAML file; repeat to merge several.
    #[arg(short, long = "schema", required = true)]
    schemas: Vec<PathBuf>,

    /// Load mode: new, upsert, delete.
    #[arg(short, long, default_value = "upsert")]
    mode: String,

    /// Skip validation. Disables every integrity check.
    #[arg(short, long)]
    cheat_mode: bool,

    /// Validate only; never write to the database.
    #[arg(short, long)]
    dry_run: bool,

    /// Delete everything in the database before loading.
    #[arg(long)]
    wipe_db: bool,

    /// Do not run the configured backup command.
    #[arg(long)]
    no_backup: bool,

    /// Maximum number of violations to print.
    #[arg(short = 'M', long)]
    max_violations: Option<usize>,

    /// Neo4j URI (overrides config).
    #[arg(short = 'i', long)]
    uri: Option<String>,

    /// Neo4j user (overrides config).
    #[arg(short, long)]
    user: Option<String>,

    /// Neo4j password (overrides config).
    #[arg(short, long)]
    password: Option<String>,

    /// Config file prefix (default: tabgraph).
    #[arg(long, default_value = "tabgraph")]
    config: String,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    let settings = load_settings(&cli.config)?;
    let loader_config: LoaderConfig = section(&settings, "loader")?;
    loader_config.validate()?;
    let mut graph_config: GraphConfig = section(&settings, "neo4j")?;
    apply_overrides(&mut graph_config, &cli);
    let mode: LoadMode = cli.mode.parse().map_err(anyhow::Error::msg)?;

    if cli.wipe_db && !cli.dry_run && !cli.no_backup && !loader_config.backup.is_configured() {
        anyhow::bail!(
            "--wipe-db needs a backup: configure loader.backup.command or pass --no-backup"
        );
    }

    let schema = Schema::load(&cli.schemas)?;
    let files = select_inputs(&cli.inputs, &loader_config.file_pattern)?;
    tracing::info!(files = files.len(), mode = %mode, "Inputs selected");

    let flags = RunFlags {
        mode,
        cheat_mode: cli.cheat_mode,
        dry_run: cli.dry_run,
        max_violations: cli.max_violations.unwrap_or(loader_config.max_violations),
    };

    let loader = Loader::new(&schema, &loader_config);
    let prepared = loader.prepare(&files, &flags)?;

    if let Some(validation) = prepared.validation() {
        print_violations(validation);
    }
    if flags.dry_run {
        let errors = prepared.validation().map_or(0, |v| v.error_count);
        println!(
            "Dry run complete: {} record(s) in {} file(s), {errors} error(s). Nothing was written.",
            prepared.record_count(),
            files.len()
        );
        return Ok(exit_status(errors == 0));
    }
    if prepared.is_rejected() {
        println!("Validation failed; nothing was loaded. Fix the errors or use --cheat-mode.");
        return Ok(ExitCode::FAILURE);
    }

    let wipe = if cli.wipe_db {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        match confirm_wipe(&mut input, &mut io::stdout(), &graph_config.uri)? {
            Some(confirmed) => Some(confirmed),
            None => {
                println!("Wipe not confirmed; nothing was changed.");
                return Ok(ExitCode::FAILURE);
            }
        }
    } else {
        None
    };

    let backup_name = backup::backup_name(chrono::Local::now());
    let backed_up = loader_config.backup.is_configured() && !cli.no_backup;
    if backed_up {
        backup::run_backup(&loader_config.backup, &backup_name).await?;
    }

    let graph = GraphClient::connect(&graph_config).await?;
    tracing::info!(uri = %graph_config.uri, "Connected to Neo4j");

    let report = loader.load(&graph, prepared, &flags, wipe).await?;

    println!("{}", report.summary());
    for failure in &report.failed_files {
        println!("  FAILED {}: {}", failure.file, failure.reason);
    }
    if let Some(abort) = &report.aborted {
        println!("  ABORTED {}: {}", abort.file, abort.reason);
        for skipped in &report.files_skipped {
            println!("  SKIPPED {skipped}");
        }
    }
    if backed_up {
        if let Some(hint) = backup::restore_hint(&loader_config.backup, &backup_name) {
            tracing::info!(backup = %backup_name, "To restore the pre-load state: {hint}");
        }
    }

    Ok(exit_status(report.is_success()))
}

fn exit_status(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_violations(validation: &ValidationSummary) {
    for violation in &validation.violations {
        println!("{violation}");
    }
    if validation.is_truncated() {
        println!(
            "... {} more violation(s) not shown",
            validation.total() - validation.violations.len()
        );
    }
    println!(
        "{} record(s) checked: {} error(s), {} warning(s)",
        validation.records_checked, validation.error_count, validation.warning_count
    );
}

/// `tabgraph.toml` (or `--config`) overlaid with `TABGRAPH__*` variables.
fn load_settings(file_prefix: &str) -> anyhow::Result<config::Config> {
    Ok(config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("TABGRAPH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?)
}

/// A missing section falls back to its defaults.
fn section<T: DeserializeOwned + Default>(settings: &config::Config, key: &str) -> anyhow::Result<T> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("invalid [{key}] configuration"))),
    }
}

fn apply_overrides(graph_config: &mut GraphConfig, cli: &Cli) {
    if let Some(uri) = &cli.uri {
        graph_config.uri = uri.clone();
    }
    if let Some(user) = &cli.user {
        graph_config.user = user.clone();
    }
    if let Some(password) = &cli.password {
        graph_config.password = password.clone();
    }
}
