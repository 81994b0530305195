//! File-backed storage with pwrite-style offset writes.

use super::{temp_path, Storage, StorageFactory};
use crate::error::DownloadError;
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

fn storage_err(context: &str, e: impl std::fmt::Display) -> DownloadError {
    DownloadError::storage(format!("{}: {}", context, e))
}

/// Storage for one destination file. Writes go to `<dest>.part`; `finalize`
/// renames it onto the destination.
pub struct FileStorage {
    file: Arc<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    /// One writer at a time per file, even though segments target disjoint
    /// regions; keeps the handle's use simple and safe.
    write_lock: Mutex<()>,
    io: Arc<Semaphore>,
}

impl FileStorage {
    fn open_file(dest_path: &Path, resume: bool) -> Result<(File, PathBuf), DownloadError> {
        if let Some(parent) = dest_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| storage_err("create destination directory", e))?;
            }
        }
        let tp = temp_path(dest_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!resume)
            .open(&tp)
            .map_err(|e| storage_err("open temp file", e))?;
        Ok((file, tp))
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, DownloadError>
    where
        T: Send + 'static,
        F: FnOnce(&File) -> std::io::Result<T> + Send + 'static,
    {
        let _permit = self
            .io
            .acquire()
            .await
            .map_err(|e| storage_err("io pool closed", e))?;
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || op(&file))
            .await
            .map_err(|e| storage_err("io task join", e))?
            .map_err(|e| storage_err("file io", e))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), DownloadError> {
        let _serialized = self.write_lock.lock().await;
        let buf = data.to_vec();
        self.blocking(move |file| {
            #[cfg(unix)]
            {
                file.write_all_at(&buf, offset)
            }
            #[cfg(not(unix))]
            {
                use std::io::{Seek, SeekFrom, Write};
                let mut f = file.try_clone()?;
                f.seek(SeekFrom::Start(offset))?;
                f.write_all(&buf)
            }
        })
        .await
    }

    async fn preallocate(&self, size: u64) -> Result<(), DownloadError> {
        self.blocking(move |file| {
            #[cfg(unix)]
            {
                let r = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
                if r == 0 {
                    return Ok(());
                }
                tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
            }
            file.set_len(size)
        })
        .await
    }

    async fn flush(&self) -> Result<(), DownloadError> {
        self.blocking(|file| file.sync_all()).await
    }

    async fn size(&self) -> Result<u64, DownloadError> {
        self.blocking(|file| file.metadata().map(|m| m.len())).await
    }

    async fn finalize(&self) -> Result<(), DownloadError> {
        let _serialized = self.write_lock.lock().await;
        let tp = self.temp_path.clone();
        let fp = self.final_path.clone();
        self.blocking(move |file| {
            file.sync_all()?;
            std::fs::rename(&tp, &fp)
        })
        .await
    }

    async fn delete(&self) -> Result<(), DownloadError> {
        let _serialized = self.write_lock.lock().await;
        let tp = self.temp_path.clone();
        self.blocking(move |_file| match std::fs::remove_file(&tp) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

/// Factory producing `FileStorage` bounded by the engine's io pool.
pub struct FileStorageFactory {
    io: Arc<Semaphore>,
}

impl FileStorageFactory {
    pub fn new(io: Arc<Semaphore>) -> Self {
        Self { io }
    }
}

impl StorageFactory for FileStorageFactory {
    fn open(&self, dest_path: &Path, resume: bool) -> Result<Arc<dyn Storage>, DownloadError> {
        let (file, tp) = FileStorage::open_file(dest_path, resume)?;
        Ok(Arc::new(FileStorage {
            file: Arc::new(file),
            temp_path: tp,
            final_path: dest_path.to_path_buf(),
            write_lock: Mutex::new(()),
            io: Arc::clone(&self.io),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> FileStorageFactory {
        FileStorageFactory::new(Arc::new(Semaphore::new(4)))
    }

    #[tokio::test]
    async fn preallocate_write_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("output.bin");
        let storage = factory().open(&dest, false).unwrap();

        storage.preallocate(100).await.unwrap();
        storage.write_at(0, b"hello").await.unwrap();
        storage.write_at(50, b"world").await.unwrap();
        storage.write_at(95, b"xy").await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 100);
        storage.finalize().await.unwrap();

        assert!(!temp_path(&dest).exists());
        let buf = std::fs::read(&dest).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(&buf[0..5], b"hello");
        assert_eq!(&buf[50..55], b"world");
        assert_eq!(&buf[95..97], b"xy");
    }

    #[tokio::test]
    async fn resume_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        {
            let storage = factory().open(&dest, false).unwrap();
            storage.preallocate(10).await.unwrap();
            storage.write_at(0, b"abcde").await.unwrap();
            storage.flush().await.unwrap();
        }
        let storage = factory().open(&dest, true).unwrap();
        assert_eq!(storage.size().await.unwrap(), 10);
        storage.write_at(5, b"fghij").await.unwrap();
        storage.finalize().await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.bin");
        let storage = factory().open(&dest, false).unwrap();
        storage.write_at(0, b"x").await.unwrap();
        storage.delete().await.unwrap();
        assert!(!temp_path(&dest).exists());
        storage.delete().await.unwrap();
    }
}
