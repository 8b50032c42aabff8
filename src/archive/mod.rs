//! Archive references and sources
//!
//! An [`ArchiveReference`] names one remote file on the archive host. The
//! [`url`] module builds the ordered list of references for a run and the
//! [`http`] module fetches them.

use crate::{Frequency, Interval, MarketType};
use async_trait::async_trait;
use std::path::Path;

pub mod http;
pub mod url;

pub use http::HttpArchiveSource;
pub use url::{ReferenceFilter, UrlBuilder};

/// Default archive host
pub const BINANCE_VISION_BASE_URL: &str = "https://data.binance.vision";

/// Fetch errors for a single archive
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-success HTTP status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Status code returned by the host
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Network error (connection, TLS, body read)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Request exceeded its timeout
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Server answered with an empty body
    #[error("empty archive body for {0}")]
    EmptyBody(String),

    /// Local file could not be written
    #[error("IO error: {0}")]
    IoError(String),

    /// Checksum validation failed
    #[error("checksum validation failed: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest published next to the archive
        expected: String,
        /// Digest of the downloaded bytes
        actual: String,
    },

    /// CHECKSUM companion file was malformed
    #[error("invalid CHECKSUM file: {0}")]
    InvalidChecksum(String),
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Time bucket covered by one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchivePeriod {
    /// Whole calendar month
    Month {
        /// Year (e.g., 2024)
        year: i32,
        /// Month (1-12)
        month: u32,
    },
    /// Single calendar day
    Day {
        /// Year (e.g., 2024)
        year: i32,
        /// Month (1-12)
        month: u32,
        /// Day of month (1-31)
        day: u32,
    },
}

impl ArchivePeriod {
    /// Year of the period
    pub fn year(&self) -> i32 {
        match *self {
            ArchivePeriod::Month { year, .. } | ArchivePeriod::Day { year, .. } => year,
        }
    }

    /// Month of the period
    pub fn month(&self) -> u32 {
        match *self {
            ArchivePeriod::Month { month, .. } | ArchivePeriod::Day { month, .. } => month,
        }
    }
}

impl std::fmt::Display for ArchivePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchivePeriod::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            ArchivePeriod::Day { year, month, day } => {
                write!(f, "{year:04}-{month:02}-{day:02}")
            }
        }
    }
}

/// One remote archive file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveReference {
    /// Trading symbol, upper-case (e.g., BTCUSDT)
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
    /// Market the archive belongs to
    pub market: MarketType,
    /// Time bucket covered by the archive
    pub period: ArchivePeriod,
}

impl ArchiveReference {
    /// Archive granularity, derived from the period
    pub fn frequency(&self) -> Frequency {
        match self.period {
            ArchivePeriod::Month { .. } => Frequency::Monthly,
            ArchivePeriod::Day { .. } => Frequency::Daily,
        }
    }

    /// Archive file name: `{SYMBOL}-{interval}-{period}.zip`
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.zip", self.symbol, self.interval, self.period)
    }

    /// Full archive URL below `base_url`
    ///
    /// URL pattern: `{base}/data/{market}/{frequency}/klines/{SYMBOL}/{interval}/{file}`
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/data/{}/{}/klines/{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.market.url_path(),
            self.frequency(),
            self.symbol,
            self.interval,
            self.file_name()
        )
    }

    /// CHECKSUM companion URL
    pub fn checksum_url(&self, base_url: &str) -> String {
        format!("{}.CHECKSUM", self.url(base_url))
    }
}

impl std::fmt::Display for ArchiveReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.market, self.symbol, self.interval, self.period
        )
    }
}

/// Source of archive files
///
/// The production implementation is [`HttpArchiveSource`]; tests substitute an
/// in-memory source.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch the archive for `reference` and persist it at `destination`
    ///
    /// Returns the number of bytes written. On error no file is left at
    /// `destination`.
    async fn fetch(&self, reference: &ArchiveReference, destination: &Path) -> FetchResult<u64>;

    /// Whether the archive for `reference` exists on the host
    async fn exists(&self, reference: &ArchiveReference) -> bool;

    /// Human-readable location of `reference`, used in reports
    fn locate(&self, reference: &ArchiveReference) -> String;
}
