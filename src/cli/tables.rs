//! Table maintenance subcommands

use crate::output::inspect::{inspect_tables, merge_tables, InspectReport, MergeReport, TableReport};
use crate::Interval;
use chrono::DateTime;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use super::{CliError, OutputFormat};

/// Gaps listed per table in human output
const GAPS_SHOWN: usize = 10;

/// Subcommands working on written Parquet tables
#[derive(Subcommand, Debug)]
pub enum TableCommand {
    /// Report rows, open-time range, schema and gaps of Parquet tables
    Inspect(InspectArgs),

    /// Merge Parquet tables into one table ordered by open time
    Merge(MergeArgs),
}

/// Arguments of `inspect`
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Parquet files or directories containing them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Interval for gap detection (default: taken from each file name)
    #[arg(long, value_parser = Interval::from_str)]
    pub interval: Option<Interval>,

    /// Output format (json or human)
    #[arg(long, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Arguments of `merge`
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Parquet files or directories containing them
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Merged table to write
    #[arg(long, short)]
    pub output: PathBuf,

    /// Output format (json or human)
    #[arg(long, default_value = "human")]
    pub output_format: OutputFormat,
}

impl TableCommand {
    /// Run the subcommand; `Ok(false)` when some table was unusable
    pub fn execute(&self) -> Result<bool, CliError> {
        match self {
            TableCommand::Inspect(args) => args.execute(),
            TableCommand::Merge(args) => args.execute(),
        }
    }
}

impl InspectArgs {
    fn execute(&self) -> Result<bool, CliError> {
        let report = inspect_tables(&self.paths, self.interval)?;
        info!(
            "Inspected {} tables, {} unreadable",
            report.tables.len(),
            report.unreadable.len()
        );

        match self.output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "success": !report.has_problems(),
                    "total_rows": report.total_rows(),
                    "first_open_time": report.first_open_time(),
                    "last_open_time": report.last_open_time(),
                    "schema_consistent": report.schema_consistent(),
                    "tables": report.tables,
                    "unreadable": report.unreadable,
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Human => print_inspection(&report),
        }
        Ok(!report.has_problems())
    }
}

impl MergeArgs {
    fn execute(&self) -> Result<bool, CliError> {
        let report = merge_tables(&self.inputs, &self.output)?;

        match self.output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "success": report.skipped.is_empty(),
                    "merge": report,
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Human => print_merge(&report),
        }
        Ok(report.skipped.is_empty())
    }
}

fn format_time(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_table(table: &TableReport) {
    println!("\n{}", table.path.display());
    println!("  rows: {} ({} bytes)", table.rows, table.size_bytes);
    println!(
        "  open_time: {} .. {}",
        format_time(table.first_open_time),
        format_time(table.last_open_time)
    );

    if table.schema.matches() {
        println!("  schema: ok");
    } else {
        println!("  schema: MISMATCH");
        if !table.schema.missing.is_empty() {
            println!("    missing: {}", table.schema.missing.join(", "));
        }
        if !table.schema.unexpected.is_empty() {
            println!("    unexpected: {}", table.schema.unexpected.join(", "));
        }
        if !table.schema.mistyped.is_empty() {
            println!("    mistyped: {}", table.schema.mistyped.join(", "));
        }
        if table.schema.reordered {
            println!("    columns out of order");
        }
    }

    if table.null_values > 0 {
        println!("  null values: {}", table.null_values);
    }
    if table.duplicate_open_times > 0 {
        println!("  duplicate open times: {}", table.duplicate_open_times);
    }
    if table.unsorted {
        println!("  rows are not ordered by open_time");
    }
    if let (Some(low), Some(high)) = (table.lowest_price, table.highest_price) {
        println!("  price range: {low} .. {high}");
    }

    match table.interval {
        Some(interval) if interval.duration_millis().is_some() => {
            println!(
                "  gaps ({}): {} ({} candles missing)",
                interval,
                table.gaps.len(),
                table.missing_candles()
            );
            for gap in table.gaps.iter().take(GAPS_SHOWN) {
                println!(
                    "    {} -> {}: {} missing",
                    format_time(Some(gap.after)),
                    format_time(Some(gap.before)),
                    gap.missing
                );
            }
            if table.gaps.len() > GAPS_SHOWN {
                println!("    ... {} more", table.gaps.len() - GAPS_SHOWN);
            }
        }
        Some(interval) => println!("  gaps: not checked for {interval}"),
        None => println!("  gaps: unknown interval, pass --interval"),
    }
}

fn print_inspection(report: &InspectReport) {
    for table in &report.tables {
        print_table(table);
    }
    for failure in &report.unreadable {
        eprintln!("\nCannot read {}: {}", failure.path.display(), failure.reason);
    }

    println!(
        "\nTables: {} ({} unreadable)",
        report.tables.len(),
        report.unreadable.len()
    );
    println!("Rows: {}", report.total_rows());
    println!(
        "Open time: {} .. {}",
        format_time(report.first_open_time()),
        format_time(report.last_open_time())
    );
    println!(
        "Schema: {}",
        if report.schema_consistent() {
            "consistent"
        } else {
            "inconsistent"
        }
    );
}

fn print_merge(report: &MergeReport) {
    println!(
        "\nMerged {} tables into {}",
        report.tables_merged,
        report.output.display()
    );
    println!("  rows read: {}", report.rows_read);
    println!("  rows written: {}", report.rows_written);
    if report.duplicates_dropped > 0 {
        println!("  duplicate open times dropped: {}", report.duplicates_dropped);
    }
    println!(
        "  open_time: {} .. {}",
        format_time(report.first_open_time),
        format_time(report.last_open_time)
    );
    for skipped in &report.skipped {
        eprintln!("Skipped {}: {}", skipped.path.display(), skipped.reason);
    }
}
