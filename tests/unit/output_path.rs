use kline_archiver::archive::{ArchivePeriod, ArchiveReference};
use kline_archiver::output::{OutputLayout, OutputPathBuilder};
use kline_archiver::{Interval, MarketType};
use std::path::PathBuf;

fn reference(market: MarketType, period: ArchivePeriod) -> ArchiveReference {
    ArchiveReference {
        symbol: "BTCUSDT".to_string(),
        interval: Interval::OneMinute,
        market,
        period,
    }
}

#[test]
fn test_combined_layout_shares_one_file_per_group() {
    let builder = OutputPathBuilder::new(
        PathBuf::from("data"),
        MarketType::UsdMargined,
        "BTCUSDT",
        Interval::OneMinute,
    );

    let jan = reference(MarketType::UsdMargined, ArchivePeriod::Month { year: 2024, month: 1 });
    let feb = reference(MarketType::UsdMargined, ArchivePeriod::Month { year: 2024, month: 2 });

    let path = builder.parquet_path(OutputLayout::Combined, &jan);
    assert_eq!(path, builder.parquet_path(OutputLayout::Combined, &feb));
    assert_eq!(
        path,
        PathBuf::from("data/parquet/futures_um/BTCUSDT-1m.parquet")
    );
}

#[test]
fn test_per_archive_layout_includes_period() {
    let builder = OutputPathBuilder::new(
        PathBuf::from("data"),
        MarketType::CoinMargined,
        "BTCUSDT",
        Interval::OneMinute,
    );
    let jan = reference(MarketType::CoinMargined, ArchivePeriod::Month { year: 2024, month: 1 });

    assert_eq!(
        builder.parquet_path(OutputLayout::PerArchive, &jan),
        PathBuf::from("data/parquet/futures_cm/BTCUSDT-1m-2024-01.parquet")
    );
}

#[test]
fn test_ensure_directories_creates_download_and_parquet_dirs() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let builder = OutputPathBuilder::new(
        temp_dir.path().to_path_buf(),
        MarketType::Spot,
        "BTCUSDT",
        Interval::OneMinute,
    );

    builder.ensure_directories().unwrap();
    assert!(temp_dir.path().join("zips").join("spot").is_dir());
    assert!(temp_dir.path().join("parquet").join("spot").is_dir());
}
