//! Parquet writer for klines
//!
//! Rows are accumulated column by column and written on [`OutputWriter::close`]
//! to a temporary file that then replaces the destination. Re-running a group
//! therefore overwrites its table instead of appending to it.

use crate::Kline;
use polars::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{KlinesWriter, OutputError, OutputResult, OutputWriter};

/// Column names in output order
pub const KLINE_SCHEMA: [&str; 11] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_volume",
    "trade_count",
    "taker_buy_base_volume",
    "taker_buy_quote_volume",
];

/// Buffered Parquet writer for one output table
pub struct ParquetKlinesWriter {
    path: PathBuf,
    open_time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    close_time: Vec<i64>,
    quote_volume: Vec<f64>,
    trade_count: Vec<u64>,
    taker_buy_base_volume: Vec<f64>,
    taker_buy_quote_volume: Vec<f64>,
}

impl ParquetKlinesWriter {
    /// Create a writer for `path`; nothing touches disk until close
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            open_time: Vec::new(),
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            volume: Vec::new(),
            close_time: Vec::new(),
            quote_volume: Vec::new(),
            trade_count: Vec::new(),
            taker_buy_base_volume: Vec::new(),
            taker_buy_quote_volume: Vec::new(),
        }
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows buffered so far
    pub fn rows(&self) -> u64 {
        self.open_time.len() as u64
    }

    fn into_dataframe(self) -> OutputResult<DataFrame> {
        DataFrame::new(vec![
            Column::new("open_time".into(), self.open_time),
            Column::new("open".into(), self.open),
            Column::new("high".into(), self.high),
            Column::new("low".into(), self.low),
            Column::new("close".into(), self.close),
            Column::new("volume".into(), self.volume),
            Column::new("close_time".into(), self.close_time),
            Column::new("quote_volume".into(), self.quote_volume),
            Column::new("trade_count".into(), self.trade_count),
            Column::new("taker_buy_base_volume".into(), self.taker_buy_base_volume),
            Column::new("taker_buy_quote_volume".into(), self.taker_buy_quote_volume),
        ])
        .map_err(|e| OutputError::ParquetError(format!("dataframe creation: {e}")))
    }
}

fn to_f64(value: Decimal, column: &str) -> OutputResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| OutputError::ConversionError(format!("{column} value {value} as f64")))
}

impl KlinesWriter for ParquetKlinesWriter {
    fn write_kline(&mut self, kline: &Kline) -> OutputResult<()> {
        let open = to_f64(kline.open, "open")?;
        let high = to_f64(kline.high, "high")?;
        let low = to_f64(kline.low, "low")?;
        let close = to_f64(kline.close, "close")?;
        let volume = to_f64(kline.volume, "volume")?;
        let quote_volume = to_f64(kline.quote_volume, "quote_volume")?;
        let taker_base = to_f64(kline.taker_buy_base_volume, "taker_buy_base_volume")?;
        let taker_quote = to_f64(kline.taker_buy_quote_volume, "taker_buy_quote_volume")?;

        self.open_time.push(kline.open_time);
        self.open.push(open);
        self.high.push(high);
        self.low.push(low);
        self.close.push(close);
        self.volume.push(volume);
        self.close_time.push(kline.close_time);
        self.quote_volume.push(quote_volume);
        self.trade_count.push(kline.trade_count);
        self.taker_buy_base_volume.push(taker_base);
        self.taker_buy_quote_volume.push(taker_quote);
        Ok(())
    }
}

impl OutputWriter for ParquetKlinesWriter {
    /// Rows stay buffered until close; a Parquet footer can only be written once
    fn flush(&mut self) -> OutputResult<()> {
        debug!("{} rows buffered for {}", self.rows(), self.path.display());
        Ok(())
    }

    fn close(self) -> OutputResult<u64> {
        let rows = self.rows();
        if rows == 0 {
            debug!("No rows for {}, nothing written", self.path.display());
            return Ok(0);
        }

        let path = self.path.clone();
        let mut df = self.into_dataframe()?;
        write_table(&mut df, &path)?;

        info!("Wrote {} rows to {}", rows, path.display());
        Ok(rows)
    }
}

/// Write `df` as Snappy Parquet, replacing `path` only once the file is complete
pub(crate) fn write_table(df: &mut DataFrame, path: &Path) -> OutputResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
    }

    let temp_path = path.with_extension("parquet.tmp");
    let write_result = File::create(&temp_path)
        .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))
        .and_then(|file| {
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Snappy)
                .finish(df)
                .map_err(|e| OutputError::ParquetError(format!("write parquet: {e}")))
        });

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(OutputError::IoError(format!(
            "Failed to replace {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

/// Read a kline table back into a DataFrame
pub fn read_table(path: &Path) -> OutputResult<DataFrame> {
    let file = File::open(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| OutputError::ParquetError(format!("read: {e}")))
}
