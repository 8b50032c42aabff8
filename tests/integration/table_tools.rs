//! Inspecting and merging written kline tables

use assert_cmd::Command;
use kline_archiver::normalize::normalize_csv;
use kline_archiver::output::inspect::{inspect_table, inspect_tables, merge_tables, Gap};
use kline_archiver::output::{
    read_table, KlinesWriter, OutputError, OutputWriter, ParquetKlinesWriter, KLINE_SCHEMA,
};
use kline_archiver::Interval;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::support::kline_row;

const JAN_1: i64 = 1_704_067_200_000;

/// Write a table holding the candles for the given minutes of 2024-01-01
fn write_minutes(path: &Path, minutes: &[i64]) {
    let body: String = minutes.iter().map(|m| kline_row(*m) + "\n").collect();
    let file = normalize_csv(body.as_bytes(), "minutes.csv").unwrap();
    let mut writer = ParquetKlinesWriter::new(path);
    writer.write_klines(&file.klines).unwrap();
    writer.close().unwrap();
}

fn open_times(path: &Path) -> Vec<i64> {
    let df = read_table(path).unwrap();
    let column = df.column("open_time").unwrap().as_materialized_series().clone();
    column.i64().unwrap().into_no_null_iter().collect()
}

fn write_foreign_table(path: &Path) {
    let mut df = DataFrame::new(vec![
        Column::new("open_time".into(), vec![JAN_1]),
        Column::new("open".into(), vec!["42000.10"]),
        Column::new("ignore".into(), vec![0i64]),
    ])
    .unwrap();
    let file = std::fs::File::create(path).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
}

fn archiver() -> Command {
    let mut cmd = Command::cargo_bin("kline-archiver").unwrap();
    cmd.env("RUST_LOG", "kline_archiver=warn");
    cmd
}

#[test]
fn test_inspect_reports_rows_range_and_gaps() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT-1m.parquet");
    write_minutes(&path, &[0, 1, 2, 5, 6, 10]);

    let report = inspect_table(&path, None).unwrap();

    assert_eq!(report.rows, 6);
    assert_eq!(report.first_open_time, Some(JAN_1));
    assert_eq!(report.last_open_time, Some(JAN_1 + 10 * 60_000));
    assert!(report.schema.matches());
    assert!(!report.has_defects());
    assert!(!report.unsorted);
    assert_eq!(report.interval, Some(Interval::OneMinute));
    assert_eq!(
        report.gaps,
        vec![
            Gap {
                after: JAN_1 + 2 * 60_000,
                before: JAN_1 + 5 * 60_000,
                missing: 2
            },
            Gap {
                after: JAN_1 + 6 * 60_000,
                before: JAN_1 + 10 * 60_000,
                missing: 3
            },
        ]
    );
    assert_eq!(report.missing_candles(), 5);
    assert_eq!(report.lowest_price, Some(41_900.0));
    assert_eq!(report.highest_price, Some(42_110.50));
}

#[test]
fn test_explicit_interval_overrides_file_name() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT-1m.parquet");
    write_minutes(&path, &[0, 1, 2, 5]);

    let report = inspect_table(&path, Some(Interval::FiveMinutes)).unwrap();
    assert!(report.gaps.is_empty());

    let unnamed = dir.path().join("history.parquet");
    write_minutes(&unnamed, &[0, 5]);
    let report = inspect_table(&unnamed, None).unwrap();
    assert_eq!(report.interval, None);
    assert!(report.gaps.is_empty());
}

#[test]
fn test_inspect_detects_schema_mismatch_and_unreadable_files() {
    let dir = TempDir::new().unwrap();
    write_minutes(&dir.path().join("BTCUSDT-1m.parquet"), &[0, 1]);
    write_foreign_table(&dir.path().join("BTCUSDT-1m-legacy.parquet"));
    std::fs::write(dir.path().join("broken.parquet"), b"not parquet").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let report = inspect_tables(&[dir.path().to_path_buf()], None).unwrap();

    assert_eq!(report.tables.len(), 2);
    assert_eq!(report.unreadable.len(), 1);
    assert!(report.unreadable[0].path.ends_with("broken.parquet"));
    assert!(!report.schema_consistent());
    assert!(report.has_problems());
    assert_eq!(report.total_rows(), 3);

    let legacy = report
        .tables
        .iter()
        .find(|t| t.path.ends_with("BTCUSDT-1m-legacy.parquet"))
        .unwrap();
    assert_eq!(legacy.schema.unexpected, vec!["ignore".to_string()]);
    assert_eq!(legacy.schema.mistyped.len(), 1);
    assert_eq!(legacy.schema.missing.len(), KLINE_SCHEMA.len() - 2);
}

#[test]
fn test_missing_path_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let result = inspect_tables(&[dir.path().join("nowhere")], None);
    assert!(matches!(result, Err(OutputError::ConfigurationError(_))));

    let result = inspect_tables(&[dir.path().to_path_buf()], None);
    assert!(matches!(result, Err(OutputError::ConfigurationError(_))));
}

#[test]
fn test_merge_orders_and_deduplicates_per_archive_tables() {
    let dir = TempDir::new().unwrap();
    let parts = dir.path().join("parts");
    std::fs::create_dir_all(&parts).unwrap();
    write_minutes(&parts.join("BTCUSDT-1m-2024-01-02.parquet"), &[5, 3, 4]);
    write_minutes(&parts.join("BTCUSDT-1m-2024-01-01.parquet"), &[0, 1, 2, 3]);
    write_foreign_table(&parts.join("BTCUSDT-1m-legacy.parquet"));

    let output = parts.join("BTCUSDT-1m.parquet");
    std::fs::write(&output, b"left over").unwrap();

    let report = merge_tables(&[parts.clone()], &output).unwrap();

    assert_eq!(report.tables_merged, 2);
    assert_eq!(report.rows_read, 7);
    assert_eq!(report.rows_written, 6);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(report.first_open_time, Some(JAN_1));
    assert_eq!(report.last_open_time, Some(JAN_1 + 5 * 60_000));
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("BTCUSDT-1m-legacy.parquet"));

    let expected: Vec<i64> = (0..6).map(|m| JAN_1 + m * 60_000).collect();
    assert_eq!(open_times(&output), expected);

    let merged = inspect_table(&output, None).unwrap();
    assert!(merged.schema.matches());
    assert!(merged.gaps.is_empty());
    assert!(!output.with_extension("parquet.tmp").exists());
}

#[test]
fn test_merge_without_usable_tables_fails() {
    let dir = TempDir::new().unwrap();
    let legacy = dir.path().join("legacy.parquet");
    write_foreign_table(&legacy);

    let result = merge_tables(&[legacy], &dir.path().join("out.parquet"));
    assert!(matches!(result, Err(OutputError::ConfigurationError(_))));
    assert!(!dir.path().join("out.parquet").exists());
}

#[test]
fn test_inspect_command_json_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ETHUSDT-1m.parquet");
    write_minutes(&path, &[0, 1, 4]);

    let output = archiver()
        .args(["inspect", "--output-format", "json"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "{output:?}");

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["total_rows"], 3);
    assert_eq!(report["schema_consistent"], true);
    assert_eq!(report["first_open_time"], JAN_1);
    assert_eq!(report["tables"][0]["interval"], "1m");
    assert_eq!(report["tables"][0]["gaps"][0]["missing"], 2);
}

#[test]
fn test_inspect_command_exit_codes() {
    let dir = TempDir::new().unwrap();
    write_foreign_table(&dir.path().join("legacy.parquet"));

    archiver()
        .arg("inspect")
        .arg(dir.path())
        .assert()
        .code(1);

    archiver()
        .arg("inspect")
        .arg(dir.path().join("missing"))
        .assert()
        .code(2);
}

#[test]
fn test_merge_command_writes_table() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("SOLUSDT-1h-2024-01.parquet");
    let second = dir.path().join("SOLUSDT-1h-2024-02.parquet");
    write_minutes(&first, &[2, 3]);
    write_minutes(&second, &[0, 1]);
    let merged: PathBuf = dir.path().join("merged").join("SOLUSDT-1h.parquet");

    archiver()
        .arg("merge")
        .arg(&second)
        .arg(&first)
        .arg("--output")
        .arg(&merged)
        .assert()
        .code(0);

    let expected: Vec<i64> = (0..4).map(|m| JAN_1 + m * 60_000).collect();
    assert_eq!(open_times(&merged), expected);
}
