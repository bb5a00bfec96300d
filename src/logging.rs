//! Structured audit logging.
//!
//! Every record the sorter emits carries an `event` field naming one of the
//! [`EventKind`]s, so runs can be audited by filtering on event kind rather
//! than on message text.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Distinguishable kinds of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CreatedDir,
    SkipExists,
    SkipNotFile,
    Unclassified,
    Moved,
    PermissionRetry,
    Failed,
    Summary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CreatedDir => "created_dir",
            EventKind::SkipExists => "skip_exists",
            EventKind::SkipNotFile => "skip_not_file",
            EventKind::Unclassified => "unclassified",
            EventKind::Moved => "moved",
            EventKind::PermissionRetry => "permission_retry",
            EventKind::Failed => "failed",
            EventKind::Summary => "summary",
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info"`.
    pub level: String,
    /// Console-only override, e.g. `"warn"` while a progress bar is shown.
    pub console_level: Option<String>,
    /// Append records to this file as well as the console.
    pub file: Option<PathBuf>,
}

/// Installs the global subscriber: console on stderr plus an optional log file.
///
/// Returns `Ok(false)` when a subscriber was already installed, which
/// happens when the CLI entry point runs more than once in one process.
pub fn init(settings: &LogSettings) -> Result<bool, LoggingError> {
    let file_layer = match settings.file.as_deref() {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(env_filter(&settings.level)),
            )
        }
        None => None,
    };

    let console_level = settings.console_level.as_deref().unwrap_or(&settings.level);
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(console_level));

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    Ok(installed)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let to_error = |source| LoggingError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(to_error)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_kind_names_are_distinct() {
        let kinds = [
            EventKind::CreatedDir,
            EventKind::SkipExists,
            EventKind::SkipNotFile,
            EventKind::Unclassified,
            EventKind::Moved,
            EventKind::PermissionRetry,
            EventKind::Failed,
            EventKind::Summary,
        ];
        let names: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn test_open_log_file_creates_parent_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("logs").join("nested").join("sorter.log");

        open_log_file(&path).expect("log file should open");

        assert!(path.exists());
    }

    #[test]
    fn test_open_log_file_reports_path_on_failure() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let err = open_log_file(&blocker.join("sorter.log")).unwrap_err();

        assert!(err.to_string().contains("not-a-dir"));
    }
}
