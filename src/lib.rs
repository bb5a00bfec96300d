//! file-sorter - sort incoming files into category directories
//!
//! This library resolves file names to destination categories (with optional
//! subcategories) through an ordered suffix table, provisions the category
//! directories, and moves each file into place with collision avoidance and
//! bounded retry for locked files. Every step is recorded as a structured
//! `tracing` event, and each run ends with a summary of its outcomes.

pub mod category_table;
pub mod cli;
pub mod config;
pub mod logging;
pub mod mover;
pub mod output;
pub mod provisioner;
pub mod sort_run;

pub use category_table::{CategoryPath, CategoryRule, CategoryTable, Resolution};
pub use config::{CompiledFilters, ConfigError, Provisioning, SorterConfig};
pub use mover::{MoveOutcome, Mover, RetryPolicy};
pub use provisioner::{DirectoryProvisioner, ProvisionError};
pub use sort_run::{EntryReport, RunReport, RunSummary, SortError, Sorter};

pub use cli::{Cli, run_cli};
