//! Terminal output for the CLI.
//!
//! Colored status lines, the progress bar shown in quiet mode, the end of
//! run summary and the dry-run plan. Audit records go through `tracing`;
//! this module only renders what the user reads at the end.

use crate::category_table::Resolution;
use crate::sort_run::{PlannedEntry, RunSummary};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

/// Renders CLI output with consistent styling.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar over `total` entries.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    /// Prints a table of file counts per category.
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        let max_category_len = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = max_category_len
        );
        println!("{}", "-".repeat(max_category_len + 10));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = max_category_len
            );
        }

        println!("{}", "-".repeat(max_category_len + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = max_category_len
        );
    }

    /// Prints the outcome counters of a finished run.
    pub fn run_summary(summary: &RunSummary) {
        Self::header("SUMMARY");
        if !summary.per_category.is_empty() {
            Self::summary_table(&summary.per_category, summary.moved);
            println!();
        }

        println!("  {:<22}{}", "Moved:", summary.moved.to_string().green());
        println!(
            "  {:<22}{}",
            "Skipped (exists):",
            summary.skipped_exists.to_string().yellow()
        );
        println!("  {:<22}{}", "Skipped (not a file):", summary.skipped_not_file);
        println!("  {:<22}{}", "Unclassified:", summary.unclassified);
        if summary.excluded > 0 {
            println!("  {:<22}{}", "Excluded by filters:", summary.excluded);
        }
        let failed = summary.failed.to_string();
        println!(
            "  {:<22}{}",
            "Failed:",
            if summary.failed > 0 { failed.red() } else { failed.normal() }
        );
        println!("  {:<22}{:.2?}", "Elapsed:", summary.elapsed);

        if !summary.failures.is_empty() {
            Self::header("FAILURES");
            for (path, reason) in &summary.failures {
                Self::error(&format!("{}: {}", path.display(), reason));
            }
        }
    }

    /// Prints what a run would do, without doing it.
    pub fn dry_run_plan(plan: &[PlannedEntry]) {
        if plan.is_empty() {
            Self::dry_run_notice("No entries found to sort.");
            return;
        }

        Self::dry_run_notice("Entries would be sorted as follows:");
        let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut would_move = 0;

        for entry in plan {
            println!(" - {}", entry.name);
            match (&entry.resolution, &entry.destination) {
                _ if !entry.is_file => println!("   {}", "skip: not a file".dimmed()),
                (Resolution::Matched(category), Some(_)) if entry.destination_exists => {
                    println!("   {} {}/ (already exists)", "skip:".yellow(), category);
                }
                (Resolution::Matched(category), _) => {
                    println!("   → would move to {}/", category);
                    *category_counts.entry(category.to_string()).or_insert(0) += 1;
                    would_move += 1;
                }
                (Resolution::Unclassified, _) => {
                    println!("   {}", "unclassified: left in place".dimmed())
                }
            }
        }

        Self::header("DRY RUN SUMMARY");
        Self::summary_table(&category_counts, would_move);
        println!();
        Self::success("Dry run complete. No files were modified.");
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}
