//! Sort run orchestration.
//!
//! One run lists the source directory once, then resolves, provisions and
//! moves each entry in turn, and finally aggregates a [`RunSummary`].
//! Nothing that happens to a single entry can abort the run: only a source
//! directory that cannot be listed is fatal.

use crate::category_table::{CategoryPath, CategoryTable, Resolution};
use crate::config::{CompiledFilters, Provisioning};
use crate::logging::EventKind;
use crate::mover::{MoveOutcome, Mover, RetryPolicy};
use crate::provisioner::DirectoryProvisioner;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fatal errors: the run never started processing entries.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("Cannot read source directory {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Source is not a directory: {}", path.display())]
    SourceNotDirectory { path: PathBuf },
}

/// Phases of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Listing,
    Processing,
    Finalizing,
    Done,
}

/// A file discovered in the source directory.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub name: OsString,
    pub path: PathBuf,
}

impl SourceEntry {
    /// The file name as text, for matching and display.
    pub fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

/// What happened to one entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub source: PathBuf,
    pub category: Option<CategoryPath>,
    pub destination: Option<PathBuf>,
    #[serde(flatten)]
    pub outcome: MoveOutcome,
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub moved: usize,
    pub skipped_exists: usize,
    pub skipped_not_file: usize,
    pub unclassified: usize,
    pub failed: usize,
    /// Entries dropped by the exclusion filters before processing.
    pub excluded: usize,
    /// Files moved, per destination category.
    pub per_category: BTreeMap<String, usize>,
    /// Source path and reason of every failed entry.
    pub failures: Vec<(PathBuf, String)>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            moved: 0,
            skipped_exists: 0,
            skipped_not_file: 0,
            unclassified: 0,
            failed: 0,
            excluded: 0,
            per_category: BTreeMap::new(),
            failures: Vec::new(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Skips of either kind: destination exists, or not a file.
    pub fn skipped(&self) -> usize {
        self.skipped_exists + self.skipped_not_file
    }

    /// Every entry that reached processing.
    pub fn total(&self) -> usize {
        self.moved + self.skipped() + self.unclassified + self.failed
    }

    fn record(&mut self, report: &EntryReport) {
        match &report.outcome {
            MoveOutcome::Moved => {
                self.moved += 1;
                if let Some(category) = &report.category {
                    *self.per_category.entry(category.to_string()).or_insert(0) += 1;
                }
            }
            MoveOutcome::SkippedExists => self.skipped_exists += 1,
            MoveOutcome::SkippedNotFile => self.skipped_not_file += 1,
            MoveOutcome::Unclassified => self.unclassified += 1,
            MoveOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push((report.source.clone(), reason.clone()));
            }
        }
    }
}

/// Per-entry reports plus the summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub entries: Vec<EntryReport>,
    pub summary: RunSummary,
}

impl RunReport {
    /// The report for the entry named `name`, if it was processed.
    pub fn entry(&self, name: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// Position of the entry just processed within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Entries processed so far, this one included.
    pub position: usize,
    pub total: usize,
}

/// Dry-run view of one entry.
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub name: String,
    pub source: PathBuf,
    pub is_file: bool,
    pub resolution: Resolution,
    pub destination: Option<PathBuf>,
    pub destination_exists: bool,
}

/// Sorts one source directory into a destination tree.
///
/// The category table is injected and never changes during a run.
#[derive(Debug)]
pub struct Sorter {
    table: CategoryTable,
    destination: PathBuf,
    mover: Mover,
    filters: CompiledFilters,
    provisioning: Provisioning,
}

impl Sorter {
    /// A sorter with the default retry policy, default filters and eager
    /// provisioning.
    pub fn new(table: CategoryTable, destination: impl Into<PathBuf>) -> Self {
        Self {
            table,
            destination: destination.into(),
            mover: Mover::default(),
            filters: CompiledFilters::default(),
            provisioning: Provisioning::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.mover = Mover::new(policy);
        self
    }

    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_provisioning(mut self, provisioning: Provisioning) -> Self {
        self.provisioning = provisioning;
        self
    }

    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Runs one full pass over `source`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use file_sorter::category_table::CategoryTable;
    /// use file_sorter::sort_run::Sorter;
    /// use std::path::Path;
    ///
    /// let sorter = Sorter::new(CategoryTable::default(), "/home/me/Documents/_SortedFiles");
    /// let report = sorter.run(Path::new("/home/me/Downloads"))?;
    /// println!("moved {} files", report.summary.moved);
    /// # Ok::<(), file_sorter::sort_run::SortError>(())
    /// ```
    pub fn run(&self, source: &Path) -> Result<RunReport, SortError> {
        self.run_with(source, |_, _| {})
    }

    /// Like [`Sorter::run`], calling `on_entry` after each processed entry.
    pub fn run_with<F>(&self, source: &Path, mut on_entry: F) -> Result<RunReport, SortError>
    where
        F: FnMut(&EntryReport, Progress),
    {
        let started = Instant::now();
        let mut summary = RunSummary::new();

        enter(RunPhase::Listing);
        let entries = self.list(source, &mut summary)?;
        tracing::info!(
            source = %source.display(),
            entries = entries.len(),
            excluded = summary.excluded,
            "found entries in source directory"
        );

        enter(RunPhase::Processing);
        let mut provisioner = DirectoryProvisioner::new(&self.destination);
        if self.provisioning == Provisioning::Eager {
            let failures = provisioner.ensure_all(&self.table);
            if failures > 0 {
                tracing::warn!(failures, "some category directories could not be created");
            }
        }

        let total = entries.len();
        let mut reports = Vec::with_capacity(total);
        for (index, entry) in entries.iter().enumerate() {
            let report = self.process_guarded(entry, &mut provisioner);
            summary.record(&report);
            on_entry(
                &report,
                Progress {
                    position: index + 1,
                    total,
                },
            );
            reports.push(report);
        }

        enter(RunPhase::Finalizing);
        summary.elapsed = started.elapsed();
        tracing::info!(
            event = EventKind::Summary.as_str(),
            moved = summary.moved,
            skipped_exists = summary.skipped_exists,
            skipped_not_file = summary.skipped_not_file,
            unclassified = summary.unclassified,
            failed = summary.failed,
            excluded = summary.excluded,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "sort run complete"
        );

        enter(RunPhase::Done);
        Ok(RunReport {
            entries: reports,
            summary,
        })
    }

    /// Lists and resolves `source` without changing anything on disk.
    pub fn plan(&self, source: &Path) -> Result<Vec<PlannedEntry>, SortError> {
        let mut summary = RunSummary::new();
        let entries = self.list(source, &mut summary)?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let name = entry.display_name();
                let is_file = fs::metadata(&entry.path).is_ok_and(|m| m.is_file());
                let resolution = if is_file {
                    self.table.resolve(&name)
                } else {
                    Resolution::Unclassified
                };
                let destination = resolution
                    .category_path()
                    .map(|category| category.to_path(&self.destination).join(&entry.name));
                let destination_exists = destination
                    .as_deref()
                    .is_some_and(|dest| fs::symlink_metadata(dest).is_ok());

                PlannedEntry {
                    name,
                    source: entry.path,
                    is_file,
                    resolution,
                    destination,
                    destination_exists,
                }
            })
            .collect())
    }

    /// Reads the source directory once, sorted by file name.
    fn list(&self, source: &Path, summary: &mut RunSummary) -> Result<Vec<SourceEntry>, SortError> {
        let unreadable = |e| SortError::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        };

        let metadata = fs::metadata(source).map_err(unreadable)?;
        if !metadata.is_dir() {
            return Err(SortError::SourceNotDirectory {
                path: source.to_path_buf(),
            });
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(source).map_err(unreadable)? {
            let dir_entry = dir_entry.map_err(unreadable)?;
            let name = dir_entry.file_name();
            if !self.filters.should_include(&name.to_string_lossy()) {
                tracing::debug!(name = %name.to_string_lossy(), "excluded by filters");
                summary.excluded += 1;
                continue;
            }
            entries.push(SourceEntry {
                path: dir_entry.path(),
                name,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Processes one entry; a panic becomes a failure for this entry only.
    fn process_guarded(
        &self,
        entry: &SourceEntry,
        provisioner: &mut DirectoryProvisioner,
    ) -> EntryReport {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(entry, provisioner))) {
            Ok(report) => report,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(
                    event = EventKind::Failed.as_str(),
                    source = %entry.path.display(),
                    reason = %reason,
                    "unexpected fault while processing entry"
                );
                EntryReport {
                    name: entry.display_name(),
                    source: entry.path.clone(),
                    category: None,
                    destination: None,
                    outcome: MoveOutcome::Failed(format!("unexpected fault: {}", reason)),
                }
            }
        }
    }

    fn process(&self, entry: &SourceEntry, provisioner: &mut DirectoryProvisioner) -> EntryReport {
        let name = entry.display_name();
        let report = |category: Option<CategoryPath>, destination: Option<PathBuf>, outcome| {
            EntryReport {
                name: name.clone(),
                source: entry.path.clone(),
                category,
                destination,
                outcome,
            }
        };

        // Inspected now rather than at listing time: other processes may
        // have removed or replaced the entry in between.
        match fs::metadata(&entry.path) {
            Ok(metadata) if metadata.is_dir() => {
                tracing::info!(
                    event = EventKind::SkipNotFile.as_str(),
                    name = %name,
                    reason = "directory",
                    "skipping directory"
                );
                return report(None, None, MoveOutcome::SkippedNotFile);
            }
            Ok(metadata) if !metadata.is_file() => {
                tracing::info!(
                    event = EventKind::SkipNotFile.as_str(),
                    name = %name,
                    reason = "not a regular file",
                    "skipping entry"
                );
                return report(None, None, MoveOutcome::SkippedNotFile);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::info!(
                    event = EventKind::SkipNotFile.as_str(),
                    name = %name,
                    reason = "vanished",
                    error = %e,
                    "skipping entry"
                );
                return report(None, None, MoveOutcome::SkippedNotFile);
            }
        }

        let category = match self.table.resolve(&name) {
            Resolution::Matched(category) => category,
            Resolution::Unclassified => {
                tracing::info!(
                    event = EventKind::Unclassified.as_str(),
                    name = %name,
                    "no category matches, leaving in place"
                );
                return report(None, None, MoveOutcome::Unclassified);
            }
        };

        let directory = match provisioner.ensure(&category) {
            Ok(directory) => directory,
            Err(e) => {
                tracing::error!(
                    event = EventKind::Failed.as_str(),
                    name = %name,
                    category = %category,
                    error = %e,
                    "category directory unavailable"
                );
                return report(Some(category), None, MoveOutcome::Failed(e.to_string()));
            }
        };

        let destination = directory.join(&entry.name);
        tracing::debug!(
            name = %name,
            destination = %destination.display(),
            "moving file"
        );
        let outcome = self.mover.move_file(&entry.path, &destination);
        report(Some(category), Some(destination), outcome)
    }
}

fn enter(phase: RunPhase) {
    tracing::debug!(phase = ?phase, "sort run phase");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
