//! # Kline Archiver
//!
//! Downloads historical candlestick ("kline") archives from the Binance Vision
//! public data portal and converts them to Parquet.
//!
//! ## Features
//!
//! - **Archive discovery**: Builds the monthly or daily archive URLs for a symbol,
//!   interval and market, optionally filtered by years, months and days
//! - **Bounded concurrency**: A fixed pool of workers downloads archives in parallel
//! - **Header detection**: Handles both the headerless and the headered CSV vintages
//! - **Parquet output**: One table per symbol/interval, or one per archive
//! - **Table tools**: Inspect written tables for schema drift and gaps, and
//!   merge per-archive tables into one
//!
//! ## Quick Start
//!
//! ```no_run
//! use kline_archiver::pipeline::{Pipeline, RunConfig};
//! use kline_archiver::archive::http::HttpArchiveSource;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::builder("BTCUSDT", "1m")?
//!     .years(vec![2024])
//!     .months(vec![1, 2])
//!     .build();
//!
//! let source = Arc::new(HttpArchiveSource::new(config.request_timeout)?);
//! let summary = Pipeline::new(config, source).run().await?;
//! println!("{} rows written", summary.rows_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`archive`] - Archive references, URL building and the HTTP source
//! - [`downloader`] - Worker pool that fetches archives concurrently
//! - [`normalize`] - CSV parsing into [`Kline`] rows
//! - [`output`] - Parquet writers, output paths, table inspection and merging
//! - [`pipeline`] - Orchestration of the full run and its summary
//! - [`settings`] - Persisted user settings

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Archive references, URL building and archive sources
pub mod archive;

/// CLI argument parsing and reporting
pub mod cli;

/// Concurrent archive downloads
pub mod downloader;

/// CSV normalization
pub mod normalize;

/// Parquet output writers
pub mod output;

/// End-to-end run orchestration
pub mod pipeline;

/// Persisted user settings
pub mod settings;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Configuration errors, reported before any network activity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Unknown interval string
    #[error("unknown interval: {0}")]
    UnknownInterval(String),

    /// Unknown market type
    #[error("unknown market: {0} (expected spot, futures, futures-um or futures-cm)")]
    UnknownMarket(String),

    /// Unknown archive frequency
    #[error("unknown frequency: {0} (expected monthly or daily)")]
    UnknownFrequency(String),

    /// Symbol is empty or contains characters the exchange never uses
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// A filter value is out of range
    #[error("invalid {field} value: {value}")]
    InvalidFilter {
        /// Filter name (years, months, days)
        field: &'static str,
        /// Offending value
        value: i64,
    },

    /// Worker count out of range
    #[error("worker count {0} out of range (1..={max})", max = downloader::config::MAX_WORKERS)]
    InvalidWorkers(usize),
}

/// One candlestick record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    /// Open time (Unix timestamp in milliseconds)
    pub open_time: i64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Volume (base asset)
    pub volume: Decimal,
    /// Close time (Unix timestamp in milliseconds)
    pub close_time: i64,
    /// Quote asset volume
    pub quote_volume: Decimal,
    /// Number of trades
    pub trade_count: u64,
    /// Taker buy base asset volume
    pub taker_buy_base_volume: Decimal,
    /// Taker buy quote asset volume
    pub taker_buy_quote_volume: Decimal,
}

/// Kline interval published in the archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1 second (spot only)
    #[serde(rename = "1s")]
    OneSecond,
    /// 1 minute
    #[serde(rename = "1m")]
    OneMinute,
    /// 3 minutes
    #[serde(rename = "3m")]
    ThreeMinutes,
    /// 5 minutes
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minutes
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 30 minutes
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// 1 hour
    #[serde(rename = "1h")]
    OneHour,
    /// 2 hours
    #[serde(rename = "2h")]
    TwoHours,
    /// 4 hours
    #[serde(rename = "4h")]
    FourHours,
    /// 6 hours
    #[serde(rename = "6h")]
    SixHours,
    /// 8 hours
    #[serde(rename = "8h")]
    EightHours,
    /// 12 hours
    #[serde(rename = "12h")]
    TwelveHours,
    /// 1 day
    #[serde(rename = "1d")]
    OneDay,
    /// 3 days
    #[serde(rename = "3d")]
    ThreeDays,
    /// 1 week
    #[serde(rename = "1w")]
    OneWeek,
    /// 1 month
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    /// All intervals in ascending order
    pub const ALL: [Interval; 16] = [
        Interval::OneSecond,
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    /// Fixed length of one candle in milliseconds
    ///
    /// `None` for `1M`, whose length depends on the calendar month.
    pub fn duration_millis(&self) -> Option<i64> {
        const SECOND: i64 = 1_000;
        const MINUTE: i64 = 60 * SECOND;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;

        Some(match self {
            Interval::OneSecond => SECOND,
            Interval::OneMinute => MINUTE,
            Interval::ThreeMinutes => 3 * MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => HOUR,
            Interval::TwoHours => 2 * HOUR,
            Interval::FourHours => 4 * HOUR,
            Interval::SixHours => 6 * HOUR,
            Interval::EightHours => 8 * HOUR,
            Interval::TwelveHours => 12 * HOUR,
            Interval::OneDay => DAY,
            Interval::ThreeDays => 3 * DAY,
            Interval::OneWeek => 7 * DAY,
            Interval::OneMonth => return None,
        })
    }

    /// Interval string as used in archive paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneSecond => "1s",
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1M",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownInterval(s.to_string()))
    }
}

/// Trading venue whose archives are downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    /// Spot market
    #[serde(rename = "spot")]
    Spot,
    /// USD(T)-margined futures
    #[serde(rename = "futures-um")]
    UsdMargined,
    /// Coin-margined futures
    #[serde(rename = "futures-cm")]
    CoinMargined,
}

impl MarketType {
    /// Path segment below `/data/` on the archive host
    pub fn url_path(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::UsdMargined => "futures/um",
            MarketType::CoinMargined => "futures/cm",
        }
    }

    /// Filesystem-safe name used for output directories
    pub fn slug(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::UsdMargined => "futures_um",
            MarketType::CoinMargined => "futures_cm",
        }
    }

    /// First year the exchange published archives for this market
    pub fn launch_year(&self) -> i32 {
        match self {
            MarketType::Spot => 2017,
            MarketType::UsdMargined => 2019,
            MarketType::CoinMargined => 2020,
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url_path())
    }
}

impl FromStr for MarketType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" | "futures-um" | "futures/um" | "um" => Ok(MarketType::UsdMargined),
            "futures-cm" | "futures/cm" | "cm" => Ok(MarketType::CoinMargined),
            _ => Err(ConfigError::UnknownMarket(s.to_string())),
        }
    }
}

/// Archive granularity: one file per month or one per day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// One archive per calendar month
    #[default]
    Monthly,
    /// One archive per calendar day
    Daily,
}

impl Frequency {
    /// Path segment on the archive host
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Daily => "daily",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Frequency::Monthly),
            "daily" => Ok(Frequency::Daily),
            _ => Err(ConfigError::UnknownFrequency(s.to_string())),
        }
    }
}

/// Normalize and validate a trading symbol
///
/// Symbols are upper-cased. Only ASCII letters, digits and `_` are accepted,
/// which also keeps the symbol safe to use in URLs and file names.
///
/// ```
/// use kline_archiver::normalize_symbol;
///
/// assert_eq!(normalize_symbol(" btcusdt ").unwrap(), "BTCUSDT");
/// assert!(normalize_symbol("BTC/USDT").is_err());
/// ```
pub fn normalize_symbol(symbol: &str) -> Result<String, ConfigError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::InvalidSymbol(symbol.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}
