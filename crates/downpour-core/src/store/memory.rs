//! In-memory metadata store (not resumable across process restarts).

use super::{DownloadMetadata, MetadataStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps records in a map; useful for tests and for callers that do not
/// want on-disk state.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DownloadMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn load(&self, task_id: &str) -> Option<DownloadMetadata> {
        self.records.read().await.get(task_id).cloned()
    }

    async fn save(&self, task_id: &str, metadata: &DownloadMetadata) {
        self.records
            .write()
            .await
            .insert(task_id.to_string(), metadata.clone());
    }

    async fn clear(&self, task_id: &str) {
        self.records.write().await.remove(task_id);
    }
}
