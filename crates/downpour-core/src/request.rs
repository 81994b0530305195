//! Download requests and task identifiers.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task identifier; a UUID v4 string unless supplied by the caller.
pub type TaskId = String;

/// Immutable description of a download. Once a task exists the request never
/// changes; re-submitting the same `task_id` resumes from persisted metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// Final destination path; the engine writes to `<dest_path>.part` and
    /// renames on completion.
    pub dest_path: String,
    pub task_id: TaskId,
    /// Requested parallel connections (>= 1); may be degraded under 429.
    pub connections: usize,
    /// Higher is admitted first; equal priorities are FIFO by creation time.
    pub priority: i32,
    /// Extra request headers sent on every probe and range request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl DownloadRequest {
    /// Create a request with a fresh task id and defaults (4 connections,
    /// priority 0). Fails if `url` or `dest_path` is blank.
    pub fn new(url: impl Into<String>, dest_path: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let dest_path = dest_path.into();
        ensure!(!url.trim().is_empty(), "URL must not be blank");
        ensure!(
            !dest_path.trim().is_empty(),
            "destination path must not be blank"
        );
        Ok(Self {
            url,
            dest_path,
            task_id: generate_task_id(),
            connections: 4,
            priority: 0,
            headers: HashMap::new(),
        })
    }

    /// Set the task id; use the id of a previous task to resume it.
    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Set the requested connection count (clamped to >= 1).
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub fn generate_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}
