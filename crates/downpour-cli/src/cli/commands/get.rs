//! `downpour get <url>` - download one resource and wait for it.

use anyhow::{Context, Result};
use downpour_core::config::EngineConfig;
use downpour_core::state::DownloadState;
use downpour_core::{DownloadEngine, DownloadRequest, SpeedLimit};
use std::io::Write;

pub async fn run_get(
    cfg: EngineConfig,
    url: &str,
    output: Option<String>,
    connections: Option<usize>,
    limit: Option<u64>,
) -> Result<()> {
    let dest = match output {
        Some(p) => p,
        None => derive_filename(url),
    };
    let connections = connections.unwrap_or(cfg.max_connections);

    let engine = DownloadEngine::with_config(cfg).context("failed to start engine")?;
    let request = DownloadRequest::new(url, &dest)?.with_connections(connections);
    let task = engine.download(request).await?;
    if let Some(limit) = limit {
        task.set_speed_limit(SpeedLimit::from_option(Some(limit))).await;
    }

    println!("downloading {url} -> {dest}");
    let mut rx = task.state_watch();
    loop {
        let state = rx.borrow_and_update().clone();
        render(&state);
        if state.is_terminal() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    println!();

    let result = task.await_completion().await;
    engine.shutdown().await;
    match result {
        Ok(path) => {
            println!("saved to {path}");
            Ok(())
        }
        Err(e) => Err(e).context(format!("download of {url} failed")),
    }
}

fn render(state: &DownloadState) {
    if let DownloadState::Downloading { progress } = state {
        let line = match (progress.fraction(), progress.total) {
            (Some(f), Some(total)) => format!(
                "\r{:>5.1}%  {} / {} bytes",
                f * 100.0,
                progress.downloaded,
                total
            ),
            _ => format!("\r{} bytes", progress.downloaded),
        };
        print!("{line}");
        let _ = std::io::stdout().flush();
    }
}

/// Last path segment of the URL, or a fixed fallback for bare hosts.
fn derive_filename(url: &str) -> String {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let Some((_, path)) = after_scheme.split_once('/') else {
        return "download.bin".into();
    };
    let name = path.rsplit('/').next().unwrap_or("");
    let name = name.split(['?', '#']).next().unwrap_or("");
    if name.is_empty() {
        "download.bin".into()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_url_path() {
        assert_eq!(
            derive_filename("https://example.com/pub/file.tar.gz"),
            "file.tar.gz"
        );
        assert_eq!(
            derive_filename("https://example.com/a/b.bin?sig=x"),
            "b.bin"
        );
    }

    #[test]
    fn bare_host_falls_back() {
        assert_eq!(derive_filename("https://example.com/"), "download.bin");
        assert_eq!(derive_filename("https://example.com"), "download.bin");
    }
}
