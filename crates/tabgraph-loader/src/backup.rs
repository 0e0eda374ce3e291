//! External backup hook.
//!
//! The configured command runs as a child process via
//! `tokio::process::Command` before anything is written to the graph.

use chrono::{DateTime, Local};
use tokio::process::Command;

use crate::config::BackupConfig;
use crate::error::{LoaderError, Result};

const NAME_PLACEHOLDER: &str = "{name}";

/// Timestamped backup name, e.g. `tabgraph-20240131-174500`.
pub fn backup_name(now: DateTime<Local>) -> String {
    format!("tabgraph-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Command line with `{name}` substituted.
pub fn render_command(command: &[String], name: &str) -> Vec<String> {
    command
        .iter()
        .map(|arg| arg.replace(NAME_PLACEHOLDER, name))
        .collect()
}

/// How to restore the named backup, if a hint is configured.
pub fn restore_hint(config: &BackupConfig, name: &str) -> Option<String> {
    config
        .restore_hint
        .as_ref()
        .map(|hint| hint.replace(NAME_PLACEHOLDER, name))
}

/// Run the backup command and wait for it.
pub async fn run_backup(config: &BackupConfig, name: &str) -> Result<()> {
    let argv = render_command(&config.command, name);
    let Some((program, args)) = argv.split_first() else {
        return Err(LoaderError::Config(
            "loader.backup.command is empty".to_string(),
        ));
    };

    tracing::info!(program = %program, backup = %name, "Starting backup");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| LoaderError::BackupSpawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(LoaderError::BackupFailed {
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    tracing::info!(backup = %name, "Backup complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(command: &[&str]) -> BackupConfig {
        BackupConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            restore_hint: Some("restore.sh --from /backups/{name}.dump".to_string()),
        }
    }

    #[test]
    fn test_backup_name_format() {
        let now = Local.with_ymd_and_hms(2024, 1, 31, 17, 45, 0).unwrap();
        assert_eq!(backup_name(now), "tabgraph-20240131-174500");
    }

    #[test]
    fn test_placeholder_substitution() {
        let cfg = config(&["dump.sh", "--to", "/backups/{name}.dump"]);
        assert_eq!(
            render_command(&cfg.command, "b1"),
            vec!["dump.sh", "--to", "/backups/b1.dump"]
        );
        assert_eq!(
            restore_hint(&cfg, "b1").as_deref(),
            Some("restore.sh --from /backups/b1.dump")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_backup_reports_exit_status() {
        assert!(run_backup(&config(&["true"]), "b1").await.is_ok());
        assert!(matches!(
            run_backup(&config(&["false"]), "b1").await,
            Err(LoaderError::BackupFailed { code: 1, .. })
        ));
        assert!(matches!(
            run_backup(&config(&["/nonexistent/backup-tool"]), "b1").await,
            Err(LoaderError::BackupSpawn { .. })
        ));
        assert!(matches!(
            run_backup(&config(&[]), "b1").await,
            Err(LoaderError::Config(_))
        ));
    }
}
