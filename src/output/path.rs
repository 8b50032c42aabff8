//! Output path generation
//!
//! All files of a run live under one output directory:
//!
//! ```text
//! {output}/zips/{market}/{SYMBOL}-{interval}-{period}.zip
//! {output}/parquet/{market}/{SYMBOL}-{interval}.parquet          (combined)
//! {output}/parquet/{market}/{SYMBOL}-{interval}-{period}.parquet (per-archive)
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use kline_archiver::archive::{ArchivePeriod, ArchiveReference};
//! use kline_archiver::output::{OutputLayout, OutputPathBuilder};
//! use kline_archiver::{Interval, MarketType};
//! use std::path::PathBuf;
//!
//! let builder = OutputPathBuilder::new(
//!     PathBuf::from("binance_data"),
//!     MarketType::UsdMargined,
//!     "BTCUSDT",
//!     Interval::OneMinute,
//! );
//!
//! let reference = ArchiveReference {
//!     symbol: "BTCUSDT".to_string(),
//!     interval: Interval::OneMinute,
//!     market: MarketType::UsdMargined,
//!     period: ArchivePeriod::Month { year: 2024, month: 1 },
//! };
//!
//! let path = builder.parquet_path(OutputLayout::Combined, &reference);
//! assert_eq!(
//!     path,
//!     PathBuf::from("binance_data/parquet/futures_um/BTCUSDT-1m.parquet")
//! );
//! ```

use crate::archive::ArchiveReference;
use crate::{Interval, MarketType};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::OutputError;

/// How archives map onto Parquet files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// One table per (market, symbol, interval)
    #[default]
    Combined,
    /// One table per archive
    PerArchive,
}

impl OutputLayout {
    /// CLI spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputLayout::Combined => "combined",
            OutputLayout::PerArchive => "per-archive",
        }
    }
}

impl fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputLayout {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "combined" => Ok(OutputLayout::Combined),
            "per-archive" | "per_archive" => Ok(OutputLayout::PerArchive),
            other => Err(OutputError::ConfigurationError(format!(
                "unknown layout '{other}' (expected combined or per-archive)"
            ))),
        }
    }
}

/// Path builder for one (market, symbol, interval) group
#[derive(Debug, Clone)]
pub struct OutputPathBuilder {
    root_dir: PathBuf,
    market: MarketType,
    symbol: String,
    interval: Interval,
}

impl OutputPathBuilder {
    /// Create a new path builder
    ///
    /// # Security
    ///
    /// Symbol is sanitized to prevent path traversal.
    /// Characters `/`, `\`, `:`, `..` are replaced with `_`.
    pub fn new(root_dir: PathBuf, market: MarketType, symbol: &str, interval: Interval) -> Self {
        Self {
            root_dir,
            market,
            symbol: sanitize_symbol(symbol),
            interval,
        }
    }

    /// Directory where archives are downloaded
    pub fn download_dir(&self) -> PathBuf {
        self.root_dir.join("zips").join(self.market.slug())
    }

    /// Directory where Parquet tables are written
    pub fn parquet_dir(&self) -> PathBuf {
        self.root_dir.join("parquet").join(self.market.slug())
    }

    /// Combined table for the whole group
    pub fn combined_path(&self) -> PathBuf {
        self.parquet_dir()
            .join(format!("{}-{}.parquet", self.symbol, self.interval))
    }

    /// Table for a single archive
    pub fn archive_path(&self, reference: &ArchiveReference) -> PathBuf {
        self.parquet_dir().join(format!(
            "{}-{}-{}.parquet",
            self.symbol, self.interval, reference.period
        ))
    }

    /// Destination of `reference` under `layout`
    pub fn parquet_path(&self, layout: OutputLayout, reference: &ArchiveReference) -> PathBuf {
        match layout {
            OutputLayout::Combined => self.combined_path(),
            OutputLayout::PerArchive => self.archive_path(reference),
        }
    }

    /// Ensure the download and parquet directories exist
    pub fn ensure_directories(&self) -> Result<(), OutputError> {
        for dir_path in [self.download_dir(), self.parquet_dir()] {
            std::fs::create_dir_all(&dir_path).map_err(|e| {
                OutputError::IoError(format!(
                    "Failed to create directory {}: {}",
                    dir_path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Sanitize symbol name for filesystem safety
///
/// - `/`, `\`, `:` → `_`
/// - `..` → `__`
fn sanitize_symbol(name: &str) -> String {
    name.replace("..", "__").replace(['/', '\\', ':'], "_")
}
