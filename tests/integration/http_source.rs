//! HTTP archive source against a local server

use kline_archiver::archive::{
    ArchivePeriod, ArchiveReference, ArchiveSource, FetchError, HttpArchiveSource,
};
use kline_archiver::{Interval, MarketType};
use std::collections::HashMap;
use std::time::Duration;

use crate::support::{spawn_http_server, Route};

fn reference(month: u32) -> ArchiveReference {
    ArchiveReference {
        symbol: "BTCUSDT".to_string(),
        interval: Interval::OneMinute,
        market: MarketType::UsdMargined,
        period: ArchivePeriod::Month { year: 2024, month },
    }
}

fn path_of(reference: &ArchiveReference) -> String {
    reference.url("")
}

async fn source_for(routes: HashMap<String, Route>) -> HttpArchiveSource {
    let base_url = spawn_http_server(routes).await;
    HttpArchiveSource::new_with_base_url(base_url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_writes_archive_and_removes_temp_file() {
    let jan = reference(1);
    let body = b"PK fake archive bytes".to_vec();
    let source = source_for(HashMap::from([(path_of(&jan), Route::ok(body.clone()))])).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join(jan.file_name());
    let bytes = source.fetch(&jan, &dest).await.unwrap();

    assert_eq!(bytes, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!dir.path().join(format!("{}.tmp", jan.file_name())).exists());
}

#[tokio::test]
async fn test_missing_archive_is_http_status_error() {
    let source = source_for(HashMap::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let feb = reference(2);
    let dest = dir.path().join(feb.file_name());

    match source.fetch(&feb, &dest).await {
        Err(FetchError::HttpStatus { status, url }) => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/data/futures/um/monthly/klines/BTCUSDT/1m/BTCUSDT-1m-2024-02.zip"));
        }
        other => panic!("expected 404, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_empty_body_is_a_failure() {
    let mar = reference(3);
    let source = source_for(HashMap::from([(path_of(&mar), Route::ok(Vec::new()))])).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join(mar.file_name());

    assert!(matches!(
        source.fetch(&mar, &dest).await,
        Err(FetchError::EmptyBody(_))
    ));
    assert!(!dest.exists());
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_checksum_verification() {
    let apr = reference(4);
    let may = reference(5);
    let body = b"archive body".to_vec();
    let digest = HttpArchiveSource::compute_sha256(&body);
    let wrong = "0".repeat(64);

    let routes = HashMap::from([
        (path_of(&apr), Route::ok(body.clone())),
        (
            format!("{}.CHECKSUM", path_of(&apr)),
            Route::ok(format!("{digest}  {}\n", apr.file_name()).into_bytes()),
        ),
        (path_of(&may), Route::ok(body.clone())),
        (
            format!("{}.CHECKSUM", path_of(&may)),
            Route::ok(format!("{wrong}  {}\n", may.file_name()).into_bytes()),
        ),
    ]);
    let source = source_for(routes).await.with_checksum_verification(true);
    let dir = tempfile::tempdir().unwrap();

    let good = dir.path().join(apr.file_name());
    assert_eq!(source.fetch(&apr, &good).await.unwrap(), body.len() as u64);
    assert!(good.exists());

    let bad = dir.path().join(may.file_name());
    assert!(matches!(
        source.fetch(&may, &bad).await,
        Err(FetchError::ChecksumMismatch { .. })
    ));
    assert!(!bad.exists());
}

#[tokio::test]
async fn test_exists_uses_head_request() {
    let jun = reference(6);
    let source = source_for(HashMap::from([(path_of(&jun), Route::ok(b"x".to_vec()))])).await;

    assert!(source.exists(&jun).await);
    assert!(!source.exists(&reference(7)).await);
    assert!(source.locate(&jun).starts_with(source.base_url()));
}
