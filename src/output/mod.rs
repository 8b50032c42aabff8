//! Parquet output writers

use crate::Kline;

pub mod inspect;
pub mod parquet;
pub mod path;

pub use inspect::{inspect_tables, merge_tables, InspectReport, MergeReport};
pub use parquet::{read_table, ParquetKlinesWriter, KLINE_SCHEMA};
pub use path::{OutputLayout, OutputPathBuilder};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Parquet encode/decode error
    #[error("parquet error: {0}")]
    ParquetError(String),

    /// Invalid output configuration
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Value cannot be represented in the output schema
    #[error("conversion error: {0}")]
    ConversionError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output, returning rows written
    fn close(self) -> OutputResult<u64>;
}

/// Trait for writing klines
pub trait KlinesWriter: OutputWriter {
    /// Write a single kline to output
    fn write_kline(&mut self, kline: &Kline) -> OutputResult<()>;

    /// Write multiple klines at once
    fn write_klines(&mut self, klines: &[Kline]) -> OutputResult<()> {
        for kline in klines {
            self.write_kline(kline)?;
        }
        Ok(())
    }
}
