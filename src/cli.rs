//! Command-line interface module for file-sorter.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Configuration loading and CLI overrides
//! - Logging setup
//! - Running a sort (or a dry run) and printing the summary

use crate::config::{ConfigError, DEFAULT_LOG_FILE, Provisioning, SorterConfig, expand_home};
use crate::logging::{self, LogSettings, LoggingError};
use crate::mover::RetryPolicy;
use crate::output::OutputFormatter;
use crate::sort_run::{RunReport, SortError, Sorter};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Sort incoming files into category directories by file name suffix.
#[derive(Debug, Clone, Parser)]
#[command(name = "file-sorter", version, about)]
pub struct Cli {
    /// Directory to sort (overrides `[paths] source`).
    pub source: Option<PathBuf>,

    /// Destination root for category directories (overrides `[paths] destination`).
    #[arg(short, long)]
    pub destination: Option<PathBuf>,

    /// Configuration file (defaults to .file-sorter.toml, then ~/.config/file-sorter/config.toml).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Show what would be moved without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Total attempts for a move blocked by a locked file.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Seconds to wait between attempts on a locked file.
    #[arg(long)]
    pub backoff_secs: Option<u64>,

    /// Create category directories only when a file needs them.
    #[arg(long)]
    pub lazy: bool,

    /// Write the log to this file (default: file_sorter.log under the destination).
    #[arg(long, conflicts_with = "no_log_file")]
    pub log_file: Option<PathBuf>,

    /// Log to the console only.
    #[arg(long)]
    pub no_log_file: bool,

    /// Print the run report as JSON instead of the summary table.
    #[arg(long)]
    pub json: bool,

    /// Console shows warnings only, with a progress bar.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log debug records.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Errors that stop the CLI before or instead of a completed run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Sort(#[from] SortError),
    #[error("No source directory given (pass one as an argument or set [paths] source)")]
    MissingSource,
    #[error("Failed to render JSON report: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the CLI did, for callers that want more than the printed output.
#[derive(Debug)]
pub enum CliOutcome {
    Sorted(RunReport),
    DryRun { entries: usize },
}

/// Runs the CLI with parsed arguments.
///
/// Per-file failures do not make this return an error: the run completes
/// and they are reported in the summary. Errors mean the run could not
/// start (bad configuration, unreadable source directory). A log file
/// that cannot be opened only downgrades logging to the console.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use file_sorter::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["file-sorter", "/home/me/Downloads", "--dry-run"]);
/// match run_cli(&cli) {
///     Ok(_) => println!("done"),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub fn run_cli(cli: &Cli) -> Result<CliOutcome, CliError> {
    let config = SorterConfig::load(cli.config.as_deref())?;

    let source = cli
        .source
        .as_deref()
        .map(expand_home)
        .or_else(|| config.source())
        .ok_or(CliError::MissingSource)?;
    let destination = match cli.destination.as_deref() {
        Some(path) => expand_home(path),
        None => config.destination()?,
    };

    let log_file = if cli.no_log_file || cli.dry_run {
        None
    } else {
        cli.log_file
            .as_deref()
            .map(expand_home)
            .or_else(|| config.logging.file.as_deref().map(expand_home))
            .or_else(|| Some(destination.join(DEFAULT_LOG_FILE)))
    };
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let settings = LogSettings {
        level,
        console_level: cli.quiet.then(|| "warn".to_string()),
        file: log_file,
    };
    // Console only when the log file cannot be opened.
    if let Err(e) = logging::init(&settings) {
        logging::init(&LogSettings {
            file: None,
            ..settings
        })?;
        tracing::warn!(error = %e, "log file unavailable, logging to the console only");
    }

    let table = config.category_table()?;
    let filters = config.compile_filters()?;
    let default_policy = config.retry_policy();
    let policy = RetryPolicy::new(
        cli.max_attempts.unwrap_or(default_policy.max_attempts()),
        cli.backoff_secs
            .map(Duration::from_secs)
            .unwrap_or(default_policy.backoff()),
    );
    let provisioning = if cli.lazy {
        Provisioning::Lazy
    } else {
        config.sorting.provisioning
    };

    let sorter = Sorter::new(table, &destination)
        .with_retry_policy(policy)
        .with_filters(filters)
        .with_provisioning(provisioning);

    if cli.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Analyzing {} -> {}",
            source.display(),
            destination.display()
        ));
        let plan = sorter.plan(&source)?;
        OutputFormatter::dry_run_plan(&plan);
        return Ok(CliOutcome::DryRun {
            entries: plan.len(),
        });
    }

    if !cli.json && !cli.quiet {
        OutputFormatter::info(&format!(
            "Sorting {} -> {}",
            source.display(),
            destination.display()
        ));
    }

    let report = if cli.quiet && !cli.json {
        let pb = OutputFormatter::create_progress_bar(0);
        let report = sorter.run_with(&source, |entry, progress| {
            pb.set_length(progress.total as u64);
            pb.set_position(progress.position as u64);
            pb.set_message(entry.name.clone());
        })?;
        pb.finish_and_clear();
        report
    } else {
        sorter.run(&source)?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        OutputFormatter::run_summary(&report.summary);
        if report.summary.failed > 0 {
            OutputFormatter::warning("Some files could not be sorted. See the failures above.");
        } else {
            OutputFormatter::success("Sort complete.");
        }
    }

    Ok(CliOutcome::Sorted(report))
}
