//! Durable, resumable task metadata.
//!
//! One record per task id holds everything needed to resume byte-exact
//! without re-probing: the url, destination, probe result, and per-segment
//! offsets. The coordinator owns a task's record while it is active; the
//! store owns it at rest. A corrupted or unreadable record is a cache miss,
//! never a fatal error.

mod json_file;
mod memory;

pub use json_file::{sanitize_task_id, JsonFileStore};
pub use memory::MemoryStore;

use crate::http::ResourceInfo;
use crate::planner::Segment;
use crate::request::TaskId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The durable resume record for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub task_id: TaskId,
    pub url: String,
    pub dest_path: String,
    /// Total size if the probe reported one.
    pub total_bytes: Option<u64>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub segments: Vec<Segment>,
    /// Unix seconds.
    pub created_at: u64,
    pub updated_at: u64,
}

impl DownloadMetadata {
    pub fn downloaded_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.downloaded).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(|s| s.complete)
    }

    /// The cached probe result; trusted on resume so no re-probe is needed.
    pub fn resource_info(&self) -> ResourceInfo {
        ResourceInfo {
            content_length: self.total_bytes,
            accept_ranges: self.accept_ranges,
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// Metadata persistence capability. Implementations must serialize
/// concurrent save/clear for the same id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// `None` for unknown ids and for unreadable/corrupt records.
    async fn load(&self, task_id: &str) -> Option<DownloadMetadata>;
    async fn save(&self, task_id: &str, metadata: &DownloadMetadata);
    async fn clear(&self, task_id: &str);
}

/// Current time as Unix seconds for record timestamps.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn sample_metadata(task_id: &str) -> DownloadMetadata {
        DownloadMetadata {
            task_id: task_id.to_string(),
            url: "https://example.com/file.bin".into(),
            dest_path: "/tmp/file.bin".into(),
            total_bytes: Some(1000),
            accept_ranges: true,
            etag: Some("abc-123".into()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            segments: crate::planner::plan_segments(Some(1000), true, 4),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
        }
    }

    #[test]
    fn downloaded_bytes_sums_segments() {
        let mut m = sample_metadata("t");
        assert_eq!(m.downloaded_bytes(), 0);
        m.segments[0].downloaded = 100;
        m.segments[2].downloaded = 50;
        assert_eq!(m.downloaded_bytes(), 150);
        assert!(!m.is_complete());
        for s in &mut m.segments {
            s.complete = true;
        }
        assert!(m.is_complete());
    }

    #[test]
    fn resource_info_round_trips_probe_fields() {
        let m = sample_metadata("t");
        let info = m.resource_info();
        assert_eq!(info.content_length, Some(1000));
        assert!(info.accept_ranges);
        assert_eq!(info.etag.as_deref(), Some("abc-123"));
        assert!(info.supports_resume());
    }
}
