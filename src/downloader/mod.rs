//! Concurrent archive downloads
//!
//! The [`pool::FetcherPool`] takes the ordered list of
//! [`ArchiveReference`](crate::archive::ArchiveReference)s for a run and
//! attempts each one exactly once with a fixed number of workers.
//!
//! # Quick Start
//!
//! ```no_run
//! use kline_archiver::archive::{HttpArchiveSource, UrlBuilder};
//! use kline_archiver::downloader::FetcherPool;
//! use kline_archiver::{Interval, MarketType};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let references = UrlBuilder::new("BTCUSDT", Interval::OneHour, MarketType::Spot)
//!     .with_first_year(2024)
//!     .build();
//!
//! let source = Arc::new(HttpArchiveSource::new(Duration::from_secs(30))?);
//! let report = FetcherPool::new(source, "./zips")
//!     .with_workers(8)
//!     .run(references)
//!     .await;
//!
//! println!("{} downloaded, {} failed", report.downloaded(), report.failed());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! A failed fetch never aborts the pool. It is logged and recorded as
//! [`FetchOutcome::Failed`] so the run can continue and the summary can list
//! what to re-run.

pub mod config;
pub mod pool;

pub use pool::{FetchOutcome, FetchRecord, FetchReport, FetcherPool};
