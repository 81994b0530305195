//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

pub mod fake_http;

use downpour_core::config::EngineConfig;
use downpour_core::engine::DownloadEngine;
use downpour_core::state::DownloadState;
use downpour_core::store::JsonFileStore;
use downpour_core::task::DownloadTask;
use fake_http::FakeHttpEngine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Config with retry delays short enough for tests and persistence on every
/// progress report.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry_delay_ms: 5,
        max_retry_delay_secs: 1,
        persist_interval_ms: 0,
        progress_interval_ms: 0,
        ..EngineConfig::default()
    }
}

/// Engine wired to the fake transport and a JSON store in `store_dir`.
pub fn engine_with(
    http: Arc<FakeHttpEngine>,
    store_dir: &Path,
    cfg: EngineConfig,
) -> DownloadEngine {
    DownloadEngine::builder()
        .config(cfg)
        .http(http)
        .store(Arc::new(JsonFileStore::new(store_dir).unwrap()))
        .build()
        .unwrap()
}

/// Block until the task's state satisfies `pred`, with a hard timeout.
pub async fn wait_for(task: &DownloadTask, pred: impl Fn(&DownloadState) -> bool) {
    let mut rx = task.state_watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.expect("task state channel closed");
        }
    })
    .await
    .expect("timed out waiting for task state");
}

/// Block until the task has downloaded at least `bytes`.
pub async fn wait_for_bytes(engine: &DownloadEngine, task_id: &str, bytes: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(status) = engine.status(task_id).await {
                if status.downloaded >= bytes {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for download progress");
}
