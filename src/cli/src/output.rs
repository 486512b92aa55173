//! Output formatting utilities for the Stackup CLI.
//!
//! Supports table, JSON, and YAML output formats. Tables and progress go to
//! stdout in table mode; in JSON/YAML mode stdout carries only the document.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use stackup_core::{HealthReport, NodeReport, Outcome};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

impl OutputFormat {
    /// Whether stdout is reserved for a machine-readable document.
    pub fn is_structured(self) -> bool {
        !matches!(self, Self::Table)
    }
}

/// Print a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print a list of items in the requested format.
///
/// For table output, items must implement `Tabled`. For JSON/YAML, items must
/// implement `Serialize`.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json | OutputFormat::Yaml => print_item(items, format)?,
    }
    Ok(())
}

/// Print a single item in the requested format.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(item)?);
        }
    }
    Ok(())
}

/// Print key-value details to the terminal (non-JSON/YAML output).
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Colored outcome label.
pub fn outcome_label(outcome: &Outcome) -> ColoredString {
    let label = outcome.label().to_uppercase();
    match outcome {
        Outcome::Ready => label.green().bold(),
        Outcome::Skipped { .. } | Outcome::Cancelled => label.yellow(),
        Outcome::TimedOut { .. } | Outcome::ActionFailed { .. } => label.red().bold(),
    }
}

/// One row of the report table.
#[derive(Tabled, Serialize)]
pub struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl From<&NodeReport> for NodeRow {
    fn from(report: &NodeReport) -> Self {
        Self {
            node: report.node.to_string(),
            outcome: outcome_label(&report.outcome).to_string(),
            attempts: report.attempts,
            duration: format!("{} ms", report.duration_ms),
            detail: report.outcome.detail(),
        }
    }
}

/// Print the final report.
pub fn print_report(report: &HealthReport, format: OutputFormat) -> Result<()> {
    if format.is_structured() {
        return print_item(report, format);
    }

    print_header(&format!(
        "Startup report {} ({})",
        report.run_id(),
        report.started_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    let rows: Vec<NodeRow> = report.nodes().iter().map(NodeRow::from).collect();
    print_list(&rows, format)?;
    println!();

    let summary = report.summary();
    let verdict = format!("{}/{} ready", summary.ready, summary.total);
    if report.success() {
        print_success(&format!("Overall: READY ({})", verdict));
    } else {
        println!("{} Overall: NOT READY ({})", "[FAIL]".red().bold(), verdict);
    }
    Ok(())
}
