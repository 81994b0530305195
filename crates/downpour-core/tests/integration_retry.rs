//! Integration tests: centralized retry, backoff exhaustion, and 429
//! connection degradation.

mod common;

use common::fake_http::FakeHttpEngine;
use downpour_core::error::DownloadError;
use downpour_core::request::DownloadRequest;
use tempfile::tempdir;

fn body(len: usize) -> Vec<u8> {
    (7u8..=211).cycle().take(len).collect()
}

#[tokio::test]
async fn transient_failure_retries_and_completes() {
    let http = FakeHttpEngine::new();
    let url = "https://flaky.test/a.bin";
    let data = body(1000);
    let res = http.serve(url, data.clone());
    res.push_failure(DownloadError::network("connection reset"));

    let store_dir = tempdir().unwrap();
    let dl_dir = tempdir().unwrap();
    let dest = dl_dir.path().join("a.bin");
    let engine = common::engine_with(http.clone(), store_dir.path(), common::test_config());

    let request = DownloadRequest::new(url, dest.to_str().unwrap())
        .unwrap()
        .with_connections(1);
    let task = engine.download(request).await.unwrap();
    task.await_completion().await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    // First attempt failed before any byte arrived, so the retry re-issues
    // the full range.
    assert_eq!(
        http.recorded_ranges(url),
        vec![Some((0, 999)), Some((0, 999))]
    );
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_the_task() {
    let http = FakeHttpEngine::new();
    let url = "https://down.test/b.bin";
    let res = http.serve(url, body(1000));
    res.push_failures(DownloadError::network("connection refused"), 10);

    let store_dir = tempdir().unwrap();
    let dl_dir = tempdir().unwrap();
    let dest = dl_dir.path().join("b.bin");
    let mut cfg = common::test_config();
    cfg.retry_count = 2;
    let engine = common::engine_with(http.clone(), store_dir.path(), cfg);

    let request = DownloadRequest::new(url, dest.to_str().unwrap())
        .unwrap()
        .with_connections(1);
    let task = engine.download(request).await.unwrap();
    let err = task.await_completion().await.unwrap_err();

    assert!(matches!(err, DownloadError::Network { .. }));
    // Initial attempt plus two retries.
    assert_eq!(http.recorded_ranges(url).len(), 3);
    assert!(!dest.exists());
}

#[tokio::test]
async fn non_retryable_http_error_fails_immediately() {
    let http = FakeHttpEngine::new();
    let url = "https://forbidden.test/c.bin";
    let res = http.serve(url, body(500));
    res.push_failure(DownloadError::Http {
        code: 403,
        retry_after: None,
    });

    let store_dir = tempdir().unwrap();
    let dl_dir = tempdir().unwrap();
    let dest = dl_dir.path().join("c.bin");
    let engine = common::engine_with(http.clone(), store_dir.path(), common::test_config());

    let request = DownloadRequest::new(url, dest.to_str().unwrap())
        .unwrap()
        .with_connections(1);
    let task = engine.download(request).await.unwrap();
    let err = task.await_completion().await.unwrap_err();

    assert!(matches!(err, DownloadError::Http { code: 403, .. }));
    // A 403 is terminal: no second fetch.
    assert_eq!(http.recorded_ranges(url).len(), 1);
}

#[tokio::test]
async fn rate_limiting_degrades_connection_count() {
    let http = FakeHttpEngine::new();
    let url = "https://limited.test/d.bin";
    let data = body(8 * 1024);
    let res = http.serve(url, data.clone());
    // Two 429s: 8 connections degrade 8 -> 4 -> 2.
    res.push_failures(
        DownloadError::Http {
            code: 429,
            retry_after: None,
        },
        2,
    );

    let store_dir = tempdir().unwrap();
    let dl_dir = tempdir().unwrap();
    let dest = dl_dir.path().join("d.bin");
    let engine = common::engine_with(http.clone(), store_dir.path(), common::test_config());

    let request = DownloadRequest::new(url, dest.to_str().unwrap())
        .unwrap()
        .with_task_id("limited")
        .with_connections(8);
    let task = engine.download(request).await.unwrap();
    task.await_completion().await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    let status = engine.status("limited").await.unwrap();
    assert_eq!(status.connections, 2);
}
