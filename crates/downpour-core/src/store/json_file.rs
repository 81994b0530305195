//! File-backed metadata store: one JSON record per task.
//!
//! Records live under a state directory, named by a filesystem-safe
//! rendering of the task id. Writes go through a temp file and an atomic
//! rename so a crash never leaves a half-written record; an unparseable
//! record loads as `None` (fresh download).

use super::{DownloadMetadata, MetadataStore};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Filesystem-safe rendering of a task id: alphanumerics, `-`, and `_` are
/// kept, everything else becomes `_`. Empty ids render as `_`.
pub fn sanitize_task_id(task_id: &str) -> String {
    let out: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Metadata store writing one `<sanitized-id>.json` per task.
pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes save/clear; the whole-store lock satisfies the per-id
    // requirement and record files are small.
    io: Mutex<()>,
}

impl JsonFileStore {
    /// Store records under `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            io: Mutex::new(()),
        })
    }

    /// Default location under the XDG state directory
    /// (`~/.local/state/downpour/tasks`).
    pub fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("downpour")?;
        Self::new(xdg_dirs.get_state_home().join("tasks"))
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_task_id(task_id)))
    }

    fn read_record(path: &Path) -> Option<DownloadMetadata> {
        let data = std::fs::read(path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable metadata record, treating as absent");
                None
            }
        }
    }
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn load(&self, task_id: &str) -> Option<DownloadMetadata> {
        let _guard = self.io.lock().await;
        Self::read_record(&self.record_path(task_id))
    }

    async fn save(&self, task_id: &str, metadata: &DownloadMetadata) {
        let _guard = self.io.lock().await;
        let path = self.record_path(task_id);
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let data = serde_json::to_vec_pretty(metadata)?;
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            tracing::warn!(task_id, error = %e, "failed to persist metadata record");
        }
    }

    async fn clear(&self, task_id: &str) {
        let _guard = self.io.lock().await;
        let path = self.record_path(task_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(task_id, error = %e, "failed to clear metadata record");
            }
        }
    }
}
