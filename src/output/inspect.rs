//! Inspection and merging of written kline tables
//!
//! [`inspect_tables`] reports row counts, open-time coverage, schema
//! conformance and interval gaps for Parquet files produced by the archiver
//! (or by older tools writing the same columns). [`merge_tables`] combines
//! per-archive tables into one table ordered by open time.

use crate::Interval;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::parquet::{read_table, write_table, KLINE_SCHEMA};
use super::{OutputError, OutputResult};

/// Column type written by [`super::ParquetKlinesWriter`]
fn expected_dtype(column: &str) -> DataType {
    match column {
        "open_time" | "close_time" => DataType::Int64,
        "trade_count" => DataType::UInt64,
        _ => DataType::Float64,
    }
}

fn polars_error(context: &'static str) -> impl Fn(PolarsError) -> OutputError {
    move |e| OutputError::ParquetError(format!("{context}: {e}"))
}

/// How a table's columns compare to the kline schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaCheck {
    /// Schema columns the table lacks
    pub missing: Vec<String>,
    /// Columns not in the schema
    pub unexpected: Vec<String>,
    /// Schema columns stored with another type, as `name: actual`
    pub mistyped: Vec<String>,
    /// All schema columns present but in a different order
    pub reordered: bool,
}

impl SchemaCheck {
    /// Whether the table has exactly the kline schema
    pub fn matches(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.mistyped.is_empty()
            && !self.reordered
    }
}

/// Compare the columns of `df` with [`KLINE_SCHEMA`]
pub fn check_schema(df: &DataFrame) -> SchemaCheck {
    let names: Vec<&str> = df.get_columns().iter().map(|c| c.name().as_str()).collect();
    let mut check = SchemaCheck::default();

    for expected in KLINE_SCHEMA {
        match df.column(expected) {
            Ok(column) if *column.dtype() != expected_dtype(expected) => check
                .mistyped
                .push(format!("{expected}: {}", column.dtype())),
            Ok(_) => {}
            Err(_) => check.missing.push(expected.to_string()),
        }
    }
    check.unexpected = names
        .iter()
        .filter(|name| !KLINE_SCHEMA.iter().any(|expected| expected == *name))
        .map(|name| name.to_string())
        .collect();
    check.reordered = check.missing.is_empty()
        && check.unexpected.is_empty()
        && names.as_slice() != KLINE_SCHEMA.as_slice();
    check
}

/// Missing candles between two consecutive open times
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    /// Open time of the last candle before the gap
    pub after: i64,
    /// Open time of the first candle after the gap
    pub before: i64,
    /// Candles that would fit between the two
    pub missing: i64,
}

/// Findings for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    /// Inspected file
    pub path: PathBuf,
    /// File size on disk
    pub size_bytes: u64,
    /// Row count
    pub rows: usize,
    /// Earliest open time
    pub first_open_time: Option<i64>,
    /// Latest open time
    pub last_open_time: Option<i64>,
    /// Schema comparison
    pub schema: SchemaCheck,
    /// Null cells across all columns
    pub null_values: usize,
    /// Rows repeating an earlier open time
    pub duplicate_open_times: usize,
    /// Rows are not in ascending open-time order
    pub unsorted: bool,
    /// Interval used for gap detection
    pub interval: Option<Interval>,
    /// Gaps larger than one interval
    pub gaps: Vec<Gap>,
    /// Lowest `low`
    pub lowest_price: Option<f64>,
    /// Highest `high`
    pub highest_price: Option<f64>,
    /// Sum of `volume`
    pub total_volume: Option<f64>,
}

impl TableReport {
    /// Candles missing across all gaps
    pub fn missing_candles(&self) -> i64 {
        self.gaps.iter().map(|g| g.missing).sum()
    }

    /// Schema mismatches or null cells; gaps alone are not defects
    pub fn has_defects(&self) -> bool {
        !self.schema.matches() || self.null_values > 0
    }
}

/// A table that could not be used
#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    /// Offending file
    pub path: PathBuf,
    /// Why it was rejected
    pub reason: String,
}

/// Findings for a set of tables
#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectReport {
    /// Tables that were read
    pub tables: Vec<TableReport>,
    /// Tables that could not be read
    pub unreadable: Vec<TableFailure>,
}

impl InspectReport {
    /// Rows across all readable tables
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Earliest open time across all tables
    pub fn first_open_time(&self) -> Option<i64> {
        self.tables.iter().filter_map(|t| t.first_open_time).min()
    }

    /// Latest open time across all tables
    pub fn last_open_time(&self) -> Option<i64> {
        self.tables.iter().filter_map(|t| t.last_open_time).max()
    }

    /// Every readable table has the kline schema
    pub fn schema_consistent(&self) -> bool {
        self.tables.iter().all(|t| t.schema.matches())
    }

    /// Any table unreadable or defective
    pub fn has_problems(&self) -> bool {
        !self.unreadable.is_empty() || self.tables.iter().any(TableReport::has_defects)
    }
}

/// Interval encoded in a table name such as `BTCUSDT-1m.parquet` or
/// `BTCUSDT-1m-2024-01.parquet`
pub fn interval_from_file_name(path: &Path) -> Option<Interval> {
    let stem = path.file_stem()?.to_str()?;
    stem.split('-').nth(1)?.parse().ok()
}

/// Expand files and directories into the Parquet files they name, sorted
pub fn collect_tables(paths: &[PathBuf]) -> OutputResult<Vec<PathBuf>> {
    let mut tables = BTreeSet::new();

    for path in paths {
        if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| {
                OutputError::IoError(format!("Failed to read {}: {e}", path.display()))
            })?;
            for entry in entries.filter_map(Result::ok) {
                let file = entry.path();
                if file.is_file() && file.extension().is_some_and(|ext| ext == "parquet") {
                    tables.insert(file);
                }
            }
        } else if path.is_file() {
            tables.insert(path.clone());
        } else {
            return Err(OutputError::ConfigurationError(format!(
                "{} does not exist",
                path.display()
            )));
        }
    }

    if tables.is_empty() {
        return Err(OutputError::ConfigurationError(
            "no Parquet tables found".to_string(),
        ));
    }
    Ok(tables.into_iter().collect())
}

fn open_times(df: &DataFrame) -> OutputResult<Vec<Option<i64>>> {
    let series = df
        .column("open_time")
        .map_err(polars_error("open_time"))?
        .as_materialized_series()
        .cast(&DataType::Int64)
        .map_err(polars_error("open_time"))?;
    let values = series.i64().map_err(polars_error("open_time"))?;
    Ok(values.into_iter().collect())
}

fn float_column(df: &DataFrame, name: &str) -> Option<Series> {
    df.column(name)
        .ok()?
        .as_materialized_series()
        .cast(&DataType::Float64)
        .ok()
}

/// Gaps between ascending, distinct open times
pub fn find_gaps(sorted_open_times: &[i64], step: i64) -> Vec<Gap> {
    if step <= 0 {
        return Vec::new();
    }
    sorted_open_times
        .windows(2)
        .filter_map(|pair| {
            let distance = pair[1] - pair[0];
            (distance > step).then(|| Gap {
                after: pair[0],
                before: pair[1],
                missing: (distance - 1) / step,
            })
        })
        .collect()
}

/// Inspect one table
///
/// Gaps are measured against `interval`, or the interval in the file name
/// when none is given. Monthly candles have no fixed length and are not
/// checked for gaps.
pub fn inspect_table(path: &Path, interval: Option<Interval>) -> OutputResult<TableReport> {
    let df = read_table(path)?;
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let schema = check_schema(&df);
    let null_values = df.get_columns().iter().map(|c| c.null_count()).sum();
    let interval = interval.or_else(|| interval_from_file_name(path));

    let raw_times: Vec<i64> = if schema.missing.iter().any(|c| c == "open_time") {
        Vec::new()
    } else {
        open_times(&df)?.into_iter().flatten().collect()
    };
    let unsorted = raw_times.windows(2).any(|pair| pair[1] < pair[0]);

    let mut times = raw_times.clone();
    times.sort_unstable();
    times.dedup();
    let duplicate_open_times = raw_times.len() - times.len();

    let gaps = interval
        .and_then(|i| i.duration_millis())
        .map(|step| find_gaps(&times, step))
        .unwrap_or_default();

    let lowest_price = float_column(&df, "low").and_then(|s| s.f64().ok().and_then(|ca| ca.min()));
    let highest_price =
        float_column(&df, "high").and_then(|s| s.f64().ok().and_then(|ca| ca.max()));
    let total_volume = float_column(&df, "volume").and_then(|s| s.f64().ok().and_then(|ca| ca.sum()));

    debug!(
        "Inspected {}: {} rows, {} gaps",
        path.display(),
        df.height(),
        gaps.len()
    );

    Ok(TableReport {
        path: path.to_path_buf(),
        size_bytes,
        rows: df.height(),
        first_open_time: times.first().copied(),
        last_open_time: times.last().copied(),
        schema,
        null_values,
        duplicate_open_times,
        unsorted,
        interval,
        gaps,
        lowest_price,
        highest_price,
        total_volume,
    })
}

/// Inspect every table under `paths`; unreadable tables are reported, not fatal
pub fn inspect_tables(paths: &[PathBuf], interval: Option<Interval>) -> OutputResult<InspectReport> {
    let mut report = InspectReport::default();

    for path in collect_tables(paths)? {
        match inspect_table(&path, interval) {
            Ok(table) => report.tables.push(table),
            Err(e) => {
                warn!("Cannot inspect {}: {}", path.display(), e);
                report.unreadable.push(TableFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// Outcome of a merge
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    /// Written table
    pub output: PathBuf,
    /// Tables combined into the output
    pub tables_merged: usize,
    /// Rows read from those tables
    pub rows_read: usize,
    /// Rows in the output
    pub rows_written: usize,
    /// Rows dropped because an earlier table had the same open time
    pub duplicates_dropped: usize,
    /// Earliest open time in the output
    pub first_open_time: Option<i64>,
    /// Latest open time in the output
    pub last_open_time: Option<i64>,
    /// Tables left out, with the reason
    pub skipped: Vec<TableFailure>,
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Combine the tables under `inputs` into `output`, ordered by open time
///
/// Tables that cannot be read or do not carry the kline columns are skipped.
/// When two tables share an open time, the row from the table that sorts
/// first by path is kept. An existing `output` among the inputs is ignored.
pub fn merge_tables(inputs: &[PathBuf], output: &Path) -> OutputResult<MergeReport> {
    let mut merged: Option<DataFrame> = None;
    let mut tables_merged = 0;
    let mut skipped = Vec::new();

    for path in collect_tables(inputs)? {
        if same_file(&path, output) {
            debug!("Not merging the output table {}", path.display());
            continue;
        }

        let table = read_table(&path).and_then(|df| {
            let schema = check_schema(&df);
            if !schema.missing.is_empty() || !schema.mistyped.is_empty() {
                return Err(OutputError::ConfigurationError(format!(
                    "schema differs (missing: {:?}, mistyped: {:?})",
                    schema.missing, schema.mistyped
                )));
            }
            df.select(KLINE_SCHEMA).map_err(polars_error("select"))
        });

        match table {
            Ok(df) => {
                debug!("Merging {} ({} rows)", path.display(), df.height());
                match merged.as_mut() {
                    Some(all) => {
                        all.vstack_mut(&df).map_err(polars_error("stack"))?;
                    }
                    None => merged = Some(df),
                }
                tables_merged += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                skipped.push(TableFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    let Some(all) = merged else {
        return Err(OutputError::ConfigurationError(
            "no kline tables to merge".to_string(),
        ));
    };
    let rows_read = all.height();

    let mut order: Vec<(i64, IdxSize)> = open_times(&all)?
        .into_iter()
        .enumerate()
        .filter_map(|(row, time)| Some((time?, row as IdxSize)))
        .collect();
    order.sort_by_key(|(time, _)| *time);
    order.dedup_by_key(|(time, _)| *time);

    let indices = IdxCa::from_vec("row".into(), order.iter().map(|(_, row)| *row).collect());
    let mut sorted = all.take(&indices).map_err(polars_error("sort"))?;
    write_table(&mut sorted, output)?;

    info!(
        "Merged {} tables into {} ({} rows)",
        tables_merged,
        output.display(),
        sorted.height()
    );

    Ok(MergeReport {
        output: output.to_path_buf(),
        tables_merged,
        rows_read,
        rows_written: sorted.height(),
        duplicates_dropped: rows_read - sorted.height(),
        first_open_time: order.first().map(|(time, _)| *time),
        last_open_time: order.last().map(|(time, _)| *time),
        skipped,
    })
}
