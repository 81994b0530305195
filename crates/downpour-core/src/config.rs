use crate::limiter::SpeedLimit;
use crate::retry::RetryPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration loaded from `~/.config/downpour/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum tasks actively downloading at once; the rest stay queued.
    pub max_concurrent_downloads: usize,
    /// Default number of connections (segments) per task.
    pub max_connections: usize,
    /// Maximum concurrent connections to a single host across all tasks.
    pub max_connections_per_host: usize,
    /// Whether new tasks start immediately or wait for an explicit start.
    pub auto_start: bool,
    /// Maximum retries per segment after the first attempt.
    pub retry_count: u32,
    /// Base delay in milliseconds for exponential backoff between retries.
    pub retry_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_retry_delay_secs: u64,
    /// Minimum interval in milliseconds between metadata persists.
    pub persist_interval_ms: u64,
    /// Minimum interval in milliseconds between progress events.
    pub progress_interval_ms: u64,
    /// Largest single write a segment worker issues; bigger transport
    /// chunks are split at this size.
    pub buffer_size: usize,
    /// Network pool size; 0 derives it from the download/connection limits.
    pub network_pool_size: usize,
    /// Blocking file-io pool size; 0 derives a small default.
    pub io_pool_size: usize,
    /// Event feed backlog before slow subscribers start losing events.
    pub event_backlog: usize,
    /// Optional global bandwidth cap in bytes per second (None = no cap).
    pub max_bytes_per_sec: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_connections: 4,
            max_connections_per_host: 8,
            auto_start: true,
            retry_count: 3,
            retry_delay_ms: 1000,
            max_retry_delay_secs: 30,
            persist_interval_ms: 500,
            progress_interval_ms: 200,
            buffer_size: 8192,
            network_pool_size: 0,
            io_pool_size: 0,
            event_backlog: 256,
            max_bytes_per_sec: None,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_count,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
        }
    }

    pub fn global_limit(&self) -> SpeedLimit {
        SpeedLimit::from_option(self.max_bytes_per_sec)
    }

    /// Concurrent network transfers the engine will run. Defaults to enough
    /// permits for every admitted task to use its full connection count.
    pub fn network_permits(&self) -> usize {
        if self.network_pool_size > 0 {
            return self.network_pool_size;
        }
        (self.max_concurrent_downloads * self.max_connections).max(1)
    }

    pub fn io_permits(&self) -> usize {
        if self.io_pool_size > 0 {
            return self.io_pool_size;
        }
        4
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("downpour")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
