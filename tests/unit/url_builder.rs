use chrono::NaiveDate;
use kline_archiver::archive::url::detect_first_year;
use kline_archiver::archive::{ArchivePeriod, ReferenceFilter, UrlBuilder, BINANCE_VISION_BASE_URL};
use kline_archiver::{Frequency, Interval, MarketType};

use crate::support::{zip_bytes, MemorySource};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_one_reference_per_requested_month() {
    let refs = UrlBuilder::new("BTCUSDT", Interval::OneMinute, MarketType::UsdMargined)
        .with_filter(ReferenceFilter {
            years: vec![2024],
            months: vec![1, 2, 3],
            days: vec![],
        })
        .with_today(date(2025, 1, 15))
        .build();

    let urls: Vec<String> = refs.iter().map(|r| r.url(BINANCE_VISION_BASE_URL)).collect();
    assert_eq!(
        urls,
        vec![
            "https://data.binance.vision/data/futures/um/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2024-01.zip",
            "https://data.binance.vision/data/futures/um/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2024-02.zip",
            "https://data.binance.vision/data/futures/um/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2024-03.zip",
        ]
    );
}

#[test]
fn test_every_market_uses_its_path_segment() {
    for (market, segment) in [
        (MarketType::Spot, "/data/spot/"),
        (MarketType::UsdMargined, "/data/futures/um/"),
        (MarketType::CoinMargined, "/data/futures/cm/"),
    ] {
        let refs = UrlBuilder::new("ETHUSD_PERP", Interval::OneDay, market)
            .with_filter(ReferenceFilter {
                years: vec![2023],
                months: vec![6],
                days: vec![],
            })
            .with_today(date(2024, 1, 1))
            .build();

        assert_eq!(refs.len(), 1);
        let url = refs[0].url("https://example.test/");
        assert!(url.starts_with("https://example.test/data/"), "{url}");
        assert!(url.contains(segment), "{url}");
        assert!(url.ends_with("/klines/ETHUSD_PERP/1d/ETHUSD_PERP-1d-2023-06.zip"), "{url}");
    }
}

#[test]
fn test_daily_references_in_chronological_order() {
    let refs = UrlBuilder::new("BNBUSDT", Interval::FifteenMinutes, MarketType::Spot)
        .with_frequency(Frequency::Daily)
        .with_filter(ReferenceFilter {
            years: vec![2024],
            months: vec![2],
            days: vec![30, 28, 29, 28],
        })
        .with_today(date(2024, 12, 31))
        .build();

    let periods: Vec<String> = refs.iter().map(|r| r.period.to_string()).collect();
    // 2024 is a leap year; Feb 30 does not exist
    assert_eq!(periods, vec!["2024-02-28", "2024-02-29"]);
    assert!(refs[0]
        .url(BINANCE_VISION_BASE_URL)
        .contains("/data/spot/daily/klines/BNBUSDT/15m/BNBUSDT-15m-2024-02-28.zip"));
}

#[test]
fn test_no_filter_spans_first_year_to_today() {
    let refs = UrlBuilder::new("BTCUSDT", Interval::OneHour, MarketType::CoinMargined)
        .with_first_year(2022)
        .with_today(date(2023, 2, 1))
        .build();

    assert_eq!(refs.len(), 14);
    assert_eq!(refs[0].period, ArchivePeriod::Month { year: 2022, month: 1 });
    assert_eq!(refs[13].period, ArchivePeriod::Month { year: 2023, month: 2 });
    assert!(refs.windows(2).all(|w| w[0].period < w[1].period));
}

#[tokio::test]
async fn test_detect_first_year_checks_december_ascending() {
    let source = MemorySource::new()
        .with_archive("SOLUSDT-1m-2021-12.zip", zip_bytes("x.csv", ""));

    let year = detect_first_year(
        &source,
        "SOLUSDT",
        Interval::OneMinute,
        MarketType::UsdMargined,
        date(2024, 5, 1),
    )
    .await;

    assert_eq!(year, Some(2021));
    assert_eq!(
        source.lookups(),
        vec![
            "SOLUSDT-1m-2019-12.zip",
            "SOLUSDT-1m-2020-12.zip",
            "SOLUSDT-1m-2021-12.zip",
        ]
    );
}

#[tokio::test]
async fn test_detect_first_year_checks_previous_month_of_current_year() {
    let source = MemorySource::new()
        .with_archive("NEWUSDT-1h-2024-04.zip", zip_bytes("x.csv", ""));

    let year = detect_first_year(
        &source,
        "NEWUSDT",
        Interval::OneHour,
        MarketType::UsdMargined,
        date(2024, 5, 20),
    )
    .await;

    assert_eq!(year, Some(2024));
    assert_eq!(source.lookups().last().unwrap(), "NEWUSDT-1h-2024-04.zip");
}

#[tokio::test]
async fn test_detect_first_year_without_archives_is_none() {
    let source = MemorySource::new();
    let year = detect_first_year(
        &source,
        "MISSING",
        Interval::OneMinute,
        MarketType::CoinMargined,
        date(2022, 7, 1),
    )
    .await;

    assert_eq!(year, None);
    assert_eq!(source.lookups().len(), 3);
}
