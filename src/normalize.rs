//! Kline CSV normalization
//!
//! Archives come in two on-disk variants: older files start directly with
//! data, newer ones carry a header row. [`classify_first_row`] is the single
//! place that decides which variant a file is; every row after that is mapped
//! onto [`Kline`] with the same fixed column positions:
//!
//! `open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore`
//!
//! Malformed rows are logged and counted, never fatal for the file.

use crate::Kline;
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};
use zip::ZipArchive;

/// Number of columns in a kline archive row (the last one is unused)
pub const KLINE_COLUMNS: usize = 12;

/// Timestamps at or above this value are in microseconds
const MICROSECOND_THRESHOLD: i64 = 1_000_000_000_000_000;

const UTF8_BOM: char = '\u{feff}';

/// Archive-level normalization errors
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Archive could not be opened
    #[error("IO error: {0}")]
    IoError(String),

    /// File is not a readable ZIP archive
    #[error("archive error: {0}")]
    ArchiveError(String),

    /// Archive contains no CSV entry
    #[error("no CSV file in archive {0}")]
    MissingCsv(String),

    /// CSV stream could not be read
    #[error("CSV error: {0}")]
    CsvError(String),
}

/// Result type for normalization
pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Why a single row was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// Row does not have the expected number of columns
    #[error("expected {expected} columns, found {found}")]
    ColumnCount {
        /// Expected column count
        expected: usize,
        /// Actual column count
        found: usize,
    },

    /// A numeric column failed to parse
    #[error("invalid {column}: {value:?}")]
    InvalidField {
        /// Column name
        column: &'static str,
        /// Raw cell content
        value: String,
    },

    /// Row bytes are not valid UTF-8
    #[error("unreadable row: {0}")]
    Unreadable(String),

    /// Fields parse but cannot describe a real candle
    #[error("inconsistent row: {0}")]
    Inconsistent(&'static str),
}

/// Which on-disk variant a file uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceLayout {
    /// Data starts at row 1
    #[default]
    Headerless,
    /// Row 1 holds column names
    Headered,
}

/// A row that was skipped, with its 1-based line number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// Line number in the CSV file
    pub line: u64,
    /// Reason the row was rejected
    pub error: RowError,
}

/// Parsed content of one archive
#[derive(Debug, Clone, Default)]
pub struct NormalizedFile {
    /// Detected variant
    pub layout: SourceLayout,
    /// Rows in file order
    pub klines: Vec<Kline>,
    /// Rejected rows
    pub skipped: Vec<SkippedRow>,
}

/// Decide whether the first row of a file is a header
///
/// The row is data when its first cell parses as an integer timestamp;
/// anything else is treated as a header.
pub fn classify_first_row(record: &StringRecord) -> SourceLayout {
    let first = record.get(0).map(clean_cell).unwrap_or_default();
    if first.parse::<i64>().is_ok() {
        SourceLayout::Headerless
    } else {
        SourceLayout::Headered
    }
}

/// Map one CSV record onto a [`Kline`]
pub fn parse_record(record: &StringRecord) -> Result<Kline, RowError> {
    if record.len() != KLINE_COLUMNS {
        return Err(RowError::ColumnCount {
            expected: KLINE_COLUMNS,
            found: record.len(),
        });
    }

    let field = |index: usize| clean_cell(&record[index]);

    let kline = Kline {
        open_time: parse_timestamp(field(0), "open_time")?,
        open: parse_decimal(field(1), "open")?,
        high: parse_decimal(field(2), "high")?,
        low: parse_decimal(field(3), "low")?,
        close: parse_decimal(field(4), "close")?,
        volume: parse_decimal(field(5), "volume")?,
        close_time: parse_timestamp(field(6), "close_time")?,
        quote_volume: parse_decimal(field(7), "quote_volume")?,
        trade_count: field(8).parse::<u64>().map_err(|_| invalid("trade_count", field(8)))?,
        taker_buy_base_volume: parse_decimal(field(9), "taker_buy_base_volume")?,
        taker_buy_quote_volume: parse_decimal(field(10), "taker_buy_quote_volume")?,
    };
    check_consistency(&kline)?;
    Ok(kline)
}

/// Reject rows whose prices, times or volumes contradict each other
pub fn check_consistency(kline: &Kline) -> Result<(), RowError> {
    let volumes = [
        kline.volume,
        kline.quote_volume,
        kline.taker_buy_base_volume,
        kline.taker_buy_quote_volume,
    ];

    let reason = if kline.close_time <= kline.open_time {
        "close_time is not after open_time"
    } else if kline.high < kline.low {
        "high is below low"
    } else if kline.open.max(kline.close) > kline.high {
        "open or close above high"
    } else if kline.open.min(kline.close) < kline.low {
        "open or close below low"
    } else if volumes.iter().any(|v| *v < Decimal::ZERO) {
        "negative volume"
    } else {
        return Ok(());
    };
    Err(RowError::Inconsistent(reason))
}

/// Normalize CSV content read from `reader`
///
/// `source` names the file in log messages.
pub fn normalize_csv<R: Read>(reader: R, source: &str) -> NormalizeResult<NormalizedFile> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut normalized = NormalizedFile::default();
    let mut first = true;

    for (index, result) in csv_reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => match e.kind() {
                csv::ErrorKind::Utf8 { pos, .. } => {
                    let line = pos
                        .as_ref()
                        .map(|p| p.line())
                        .unwrap_or(index as u64 + 1);
                    let skipped = SkippedRow {
                        line,
                        error: RowError::Unreadable(e.to_string()),
                    };
                    warn!("Skipping row {} in {}: {}", line, source, skipped.error);
                    normalized.skipped.push(skipped);
                    first = false;
                    continue;
                }
                _ => return Err(NormalizeError::CsvError(format!("{source}: {e}"))),
            },
        };

        if first {
            first = false;
            normalized.layout = classify_first_row(&record);
            if normalized.layout == SourceLayout::Headered {
                debug!("{} has a header row, skipping it", source);
                continue;
            }
        }

        match parse_record(&record) {
            Ok(kline) => normalized.klines.push(kline),
            Err(error) => {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(index as u64 + 1);
                warn!("Skipping row {} in {}: {}", line, source, error);
                normalized.skipped.push(SkippedRow { line, error });
            }
        }
    }

    debug!(
        "Normalized {}: {} rows, {} skipped ({:?})",
        source,
        normalized.klines.len(),
        normalized.skipped.len(),
        normalized.layout
    );
    Ok(normalized)
}

/// Normalize the first CSV entry of a ZIP archive on disk
pub fn normalize_archive(path: &Path) -> NormalizeResult<NormalizedFile> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let file = File::open(path)
        .map_err(|e| NormalizeError::IoError(format!("Failed to open {}: {e}", path.display())))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| NormalizeError::ArchiveError(format!("Failed to open ZIP {name}: {e}")))?;

    let csv_name = archive
        .file_names()
        .find(|n| n.to_ascii_lowercase().ends_with(".csv"))
        .map(str::to_string)
        .ok_or_else(|| NormalizeError::MissingCsv(name.clone()))?;

    let entry = archive
        .by_name(&csv_name)
        .map_err(|e| NormalizeError::ArchiveError(format!("Failed to read {csv_name}: {e}")))?;

    normalize_csv(entry, &name)
}

fn clean_cell(cell: &str) -> &str {
    cell.trim_start_matches(UTF8_BOM).trim()
}

fn invalid(column: &'static str, value: &str) -> RowError {
    RowError::InvalidField {
        column,
        value: value.to_string(),
    }
}

/// Parse a timestamp, normalizing microseconds to milliseconds
fn parse_timestamp(value: &str, column: &'static str) -> Result<i64, RowError> {
    let raw = value.parse::<i64>().map_err(|_| invalid(column, value))?;
    if raw >= MICROSECOND_THRESHOLD {
        Ok(raw / 1_000)
    } else {
        Ok(raw)
    }
}

fn parse_decimal(value: &str, column: &'static str) -> Result<Decimal, RowError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| invalid(column, value))
}
