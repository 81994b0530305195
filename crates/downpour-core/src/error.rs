//! Classified download errors.
//!
//! Every failure the engine can observe (transport, HTTP status, disk) is
//! mapped into `DownloadError` so the coordinator can decide retries with a
//! single policy. Errors are `Clone` + `Serialize` because a task's terminal
//! `Failed` state carries the last classified error for observers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classified error for a download task or one of its segments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadError {
    /// Transport-level failure (connect, DNS, reset, timeout). Retryable.
    #[error("network: {message}")]
    Network { message: String },

    /// Non-2xx HTTP response. Retryable for 429 and 5xx.
    /// `retry_after` carries the server's `Retry-After` seconds when the
    /// status is 429; other statuses never populate it.
    #[error("HTTP {code}")]
    Http {
        code: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },

    /// Disk write, preallocation, or rename failed. Not retryable.
    #[error("storage: {message}")]
    Storage { message: String },

    /// The task was canceled by the user.
    #[error("download canceled")]
    Canceled,

    /// Terminal state reached without a specific classified cause.
    #[error("unknown: {message}")]
    Unknown { message: String },
}

impl DownloadError {
    pub fn network(message: impl Into<String>) -> Self {
        DownloadError::Network {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        DownloadError::Storage {
            message: message.into(),
        }
    }

    /// True if the coordinator may retry the failed segment.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network { .. } => true,
            DownloadError::Http { code, .. } => *code == 429 || (500..=599).contains(code),
            DownloadError::Storage { .. }
            | DownloadError::Canceled
            | DownloadError::Unknown { .. } => false,
        }
    }

    /// Server-requested backoff, honored only for HTTP 429.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DownloadError::Http {
                code: 429,
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}
