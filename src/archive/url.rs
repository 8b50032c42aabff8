//! Archive reference generation
//!
//! Produces the chronological list of archives to fetch for one symbol,
//! interval and market. The builder never contacts the host: periods in the
//! future are dropped, everything else is emitted and a missing archive only
//! shows up as a failed fetch.

use super::{ArchivePeriod, ArchiveReference, ArchiveSource};
use crate::{Frequency, Interval, MarketType};
use chrono::{Datelike, NaiveDate, Utc};
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Optional year/month/day restrictions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFilter {
    /// Years to include (empty = every year from the first year to now)
    pub years: Vec<i32>,
    /// Months to include (empty = all twelve)
    pub months: Vec<u32>,
    /// Days to include, daily archives only (empty = every day)
    pub days: Vec<u32>,
}

impl ReferenceFilter {
    /// Filter with no restrictions
    pub fn all() -> Self {
        Self::default()
    }
}

/// Builds [`ArchiveReference`]s in chronological order
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    symbol: String,
    interval: Interval,
    market: MarketType,
    frequency: Frequency,
    filter: ReferenceFilter,
    first_year: i32,
    today: NaiveDate,
}

impl UrlBuilder {
    /// Create a builder for monthly archives starting at the market launch year
    pub fn new(symbol: impl Into<String>, interval: Interval, market: MarketType) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            market,
            frequency: Frequency::Monthly,
            filter: ReferenceFilter::default(),
            first_year: market.launch_year(),
            today: Utc::now().date_naive(),
        }
    }

    /// Set archive frequency
    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Set year/month/day filter
    pub fn with_filter(mut self, filter: ReferenceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the first year archives may exist for this symbol
    pub fn with_first_year(mut self, first_year: i32) -> Self {
        self.first_year = first_year;
        self
    }

    /// Override the current date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Build the ordered list of references
    pub fn build(&self) -> Vec<ArchiveReference> {
        let years = self.years();
        let months = sorted_within(&self.filter.months, 1..=12);

        let mut periods = Vec::new();
        for &year in &years {
            for &month in &months {
                if year == self.today.year() && month > self.today.month() {
                    continue;
                }

                match self.frequency {
                    Frequency::Monthly => periods.push(ArchivePeriod::Month { year, month }),
                    Frequency::Daily => {
                        for day in sorted_within(&self.filter.days, 1..=31) {
                            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                                continue;
                            };
                            if date > self.today {
                                continue;
                            }
                            periods.push(ArchivePeriod::Day { year, month, day });
                        }
                    }
                }
            }
        }

        debug!(
            "Built {} {} references for {} {} ({} years)",
            periods.len(),
            self.frequency,
            self.symbol,
            self.interval,
            years.len()
        );

        periods
            .into_iter()
            .map(|period| ArchiveReference {
                symbol: self.symbol.clone(),
                interval: self.interval,
                market: self.market,
                period,
            })
            .collect()
    }

    fn years(&self) -> Vec<i32> {
        let current_year = self.today.year();
        if self.filter.years.is_empty() {
            (self.first_year..=current_year).collect()
        } else {
            sorted_within(&self.filter.years, self.first_year..=current_year)
        }
    }
}

/// Sort, de-duplicate and clamp a filter; empty means the full range
fn sorted_within<T>(values: &[T], full: RangeInclusive<T>) -> Vec<T>
where
    T: Copy + Ord,
    RangeInclusive<T>: Iterator<Item = T>,
{
    if values.is_empty() {
        return full.collect();
    }
    let mut kept: Vec<T> = values
        .iter()
        .copied()
        .filter(|v| full.contains(v))
        .collect();
    kept.sort_unstable();
    kept.dedup();
    kept
}

/// Find the first year a symbol has monthly archives
///
/// Checks the December archive of every year from the market launch year
/// onwards (the latest complete month for the current year) and returns the
/// first year whose archive exists, or `None` when none does.
pub async fn detect_first_year(
    source: &dyn ArchiveSource,
    symbol: &str,
    interval: Interval,
    market: MarketType,
    today: NaiveDate,
) -> Option<i32> {
    let current_year = today.year();
    info!("Detecting first archive year for {} {}", market, symbol);

    for year in market.launch_year()..=current_year {
        let month = if year < current_year {
            12
        } else if today.month() > 1 {
            today.month() - 1
        } else {
            break;
        };

        let candidate = ArchiveReference {
            symbol: symbol.to_string(),
            interval,
            market,
            period: ArchivePeriod::Month { year, month },
        };

        if source.exists(&candidate).await {
            info!("{} has archives from {}", symbol, year);
            return Some(year);
        }
        debug!("No archive for {} in {}", symbol, candidate.period);
    }

    None
}
