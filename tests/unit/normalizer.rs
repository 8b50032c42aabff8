use kline_archiver::normalize::{
    normalize_archive, normalize_csv, NormalizeError, RowError, SourceLayout,
};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::support::{csv_body, kline_row, zip_bytes, HEADER};

#[test]
fn test_headered_and_headerless_files_yield_identical_klines() {
    let headerless = normalize_csv(csv_body(5, false).as_bytes(), "headerless.csv").unwrap();
    let headered = normalize_csv(csv_body(5, true).as_bytes(), "headered.csv").unwrap();

    assert_eq!(headerless.layout, SourceLayout::Headerless);
    assert_eq!(headered.layout, SourceLayout::Headered);
    assert_eq!(headerless.klines.len(), 5);
    assert_eq!(headerless.klines, headered.klines);
    assert!(headered.skipped.is_empty());
}

#[test]
fn test_field_mapping() {
    let file = normalize_csv(csv_body(1, true).as_bytes(), "one.csv").unwrap();
    let kline = &file.klines[0];

    assert_eq!(kline.open_time, 1_704_067_200_000);
    assert_eq!(kline.open, Decimal::from_str("42000.10").unwrap());
    assert_eq!(kline.high, Decimal::from_str("42100.50").unwrap());
    assert_eq!(kline.low, Decimal::from_str("41900.00").unwrap());
    assert_eq!(kline.close, Decimal::from_str("42050.25").unwrap());
    assert_eq!(kline.volume, Decimal::from_str("12.5").unwrap());
    assert_eq!(kline.close_time, 1_704_067_259_999);
    assert_eq!(kline.quote_volume, Decimal::from_str("525000.75").unwrap());
    assert_eq!(kline.trade_count, 100);
    assert_eq!(kline.taker_buy_base_volume, Decimal::from_str("6.25").unwrap());
    assert_eq!(kline.taker_buy_quote_volume, Decimal::from_str("262500.5").unwrap());
}

#[test]
fn test_non_numeric_field_row_is_skipped() {
    let body = format!(
        "{}\n{}\n1704067320000,abc,1,1,1,1,1704067379999,1,1,1,1,0\n{}\n",
        kline_row(0),
        kline_row(1),
        kline_row(3)
    );
    let file = normalize_csv(body.as_bytes(), "bad.csv").unwrap();

    assert_eq!(file.klines.len(), 3);
    assert_eq!(file.skipped.len(), 1);
    assert_eq!(file.skipped[0].line, 3);
    assert_eq!(
        file.skipped[0].error,
        RowError::InvalidField {
            column: "open",
            value: "abc".to_string()
        }
    );
}

#[test]
fn test_short_row_is_skipped() {
    let body = format!("{}\n1704067260000,1,2,3\n", kline_row(0));
    let file = normalize_csv(body.as_bytes(), "short.csv").unwrap();

    assert_eq!(file.klines.len(), 1);
    assert_eq!(
        file.skipped[0].error,
        RowError::ColumnCount {
            expected: 12,
            found: 4
        }
    );
}

#[test]
fn test_long_row_is_skipped() {
    let body = format!("{},extra\n{}\n", kline_row(0), kline_row(1));
    let file = normalize_csv(body.as_bytes(), "long.csv").unwrap();

    assert_eq!(file.klines.len(), 1);
    assert!(matches!(
        file.skipped[0].error,
        RowError::ColumnCount { found: 13, .. }
    ));
}

#[test]
fn test_non_integer_trade_count_is_skipped() {
    let body = "1704067200000,1,1,1,1,1,1704067259999,1,12.5,1,1,0\n";
    let file = normalize_csv(body.as_bytes(), "count.csv").unwrap();

    assert!(file.klines.is_empty());
    assert_eq!(
        file.skipped[0].error,
        RowError::InvalidField {
            column: "trade_count",
            value: "12.5".to_string()
        }
    );
}

#[test]
fn test_invalid_utf8_row_is_skipped() {
    let mut body = format!("{}\n", kline_row(0)).into_bytes();
    body.extend_from_slice(b"1704067260000,\xff\xfe,1,1,1,1,1704067319999,1,1,1,1,0\n");
    body.extend_from_slice(format!("{}\n", kline_row(2)).as_bytes());

    let file = normalize_csv(body.as_slice(), "binary.csv").unwrap();

    assert_eq!(file.klines.len(), 2);
    assert_eq!(file.skipped.len(), 1);
    assert!(matches!(file.skipped[0].error, RowError::Unreadable(_)));
}

#[test]
fn test_row_with_low_above_high_is_skipped() {
    let body = format!(
        "{HEADER}\n{}\n1704067260000,42001.10,42000.00,42500.00,42001.25,1,1704067319999,1,1,1,1,0\n{}\n",
        kline_row(0),
        kline_row(2)
    );
    let file = normalize_csv(body.as_bytes(), "inverted.csv").unwrap();

    assert_eq!(file.klines.len(), 2);
    assert_eq!(file.skipped[0].line, 3);
    assert_eq!(file.skipped[0].error, RowError::Inconsistent("high is below low"));
}

#[test]
fn test_header_only_file_has_no_rows() {
    let body = format!("{HEADER}\n");
    let file = normalize_csv(body.as_bytes(), "header.csv").unwrap();

    assert_eq!(file.layout, SourceLayout::Headered);
    assert!(file.klines.is_empty());
    assert!(file.skipped.is_empty());
}

#[test]
fn test_normalize_archive_reads_csv_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BTCUSDT-1m-2024-01.zip");
    std::fs::write(&path, zip_bytes("BTCUSDT-1m-2024-01.csv", &csv_body(4, true))).unwrap();

    let file = normalize_archive(&path).unwrap();
    assert_eq!(file.klines.len(), 4);
    assert_eq!(file.layout, SourceLayout::Headered);
}

#[test]
fn test_archive_without_csv_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.zip");
    std::fs::write(&path, zip_bytes("README.txt", "nothing here")).unwrap();

    assert!(matches!(
        normalize_archive(&path),
        Err(NormalizeError::MissingCsv(_))
    ));
}

#[test]
fn test_corrupt_archive_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.zip");
    std::fs::write(&path, b"definitely not a zip").unwrap();

    assert!(matches!(
        normalize_archive(&path),
        Err(NormalizeError::ArchiveError(_))
    ));
}
