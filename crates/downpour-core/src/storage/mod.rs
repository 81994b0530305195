//! Storage capability: offset writes, preallocation, and atomic finalize.
//!
//! All access is scoped to one destination path. Bytes land in a `.part`
//! temp file; completion renames it onto the final path atomically. The
//! file implementation serializes writes internally (one writer at a time
//! per file) and runs blocking I/O on the bounded io pool.

mod file;

pub use file::{FileStorage, FileStorageFactory};

use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Temp-file path for a destination: appends `.part`
/// (`file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}

/// Write-side storage for one destination path. Errors are classified
/// `DownloadError::Storage` and are never retried.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), DownloadError>;
    /// Reserve space up-front so offset writes cannot fail late on a full disk.
    async fn preallocate(&self, size: u64) -> Result<(), DownloadError>;
    async fn flush(&self) -> Result<(), DownloadError>;
    /// Current size of the temp file in bytes.
    async fn size(&self) -> Result<u64, DownloadError>;
    /// Atomically rename the temp file onto the final path.
    async fn finalize(&self) -> Result<(), DownloadError>;
    /// Remove the temp file (cancel path). Idempotent.
    async fn delete(&self) -> Result<(), DownloadError>;
}

/// Creates storage for a task's destination. `resume` keeps existing temp
/// contents; a fresh open truncates.
pub trait StorageFactory: Send + Sync {
    fn open(&self, dest_path: &Path, resume: bool) -> Result<Arc<dyn Storage>, DownloadError>;
}
