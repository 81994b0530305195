//! Task lifecycle states.
//!
//! `DownloadState` is the sealed variant set driving the coordinator's state
//! machine: `Pending → Scheduled → Queued → Downloading ⇄ Paused →
//! {Completed | Failed | Canceled}`. Exactly one value is active per task at
//! any time; only the coordinator mutates it.

use crate::error::DownloadError;
use serde::{Deserialize, Serialize};

/// Aggregated progress snapshot published while a task is `Downloading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Bytes written across all segments.
    pub downloaded: u64,
    /// Total size if known from the probe.
    pub total: Option<u64>,
}

impl TaskProgress {
    /// Fraction complete in [0.0, 1.0]; `None` while the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.downloaded as f64 / total as f64).min(1.0))
    }
}

/// One active value per task at any time. `Completed`, `Failed`, and
/// `Canceled` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    /// Created, not yet offered to the scheduler (`auto_start = false`).
    Pending,
    /// Admitted a slot; probe/planning in flight.
    Scheduled,
    /// Waiting for a free slot (admission contention or a revoked slot).
    Queued,
    /// Workers running.
    Downloading { progress: TaskProgress },
    /// Stopped at chunk boundaries with progress persisted.
    Paused,
    /// All segments complete and the file finalized.
    Completed { path: String },
    /// Retry budget exhausted or a non-retryable error occurred.
    Failed { error: DownloadError },
    /// Torn down by the user; partial file and metadata deleted.
    Canceled,
}

impl DownloadState {
    /// True for `Pending`, `Scheduled`, `Queued`, and `Downloading`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DownloadState::Pending
                | DownloadState::Scheduled
                | DownloadState::Queued
                | DownloadState::Downloading { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed { .. }
                | DownloadState::Failed { .. }
                | DownloadState::Canceled
        )
    }

    /// Stable label used for status aggregation and logging.
    pub fn label(&self) -> &'static str {
        match self {
            DownloadState::Pending => "pending",
            DownloadState::Scheduled => "scheduled",
            DownloadState::Queued => "queued",
            DownloadState::Downloading { .. } => "downloading",
            DownloadState::Paused => "paused",
            DownloadState::Completed { .. } => "completed",
            DownloadState::Failed { .. } => "failed",
            DownloadState::Canceled => "canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_partition() {
        let states = [
            DownloadState::Pending,
            DownloadState::Scheduled,
            DownloadState::Queued,
            DownloadState::Downloading {
                progress: TaskProgress::default(),
            },
            DownloadState::Paused,
            DownloadState::Completed {
                path: "/tmp/x".into(),
            },
            DownloadState::Failed {
                error: DownloadError::Unknown {
                    message: "no classified cause".into(),
                },
            },
            DownloadState::Canceled,
        ];
        let active: Vec<_> = states.iter().filter(|s| s.is_active()).collect();
        let terminal: Vec<_> = states.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(active.len(), 4);
        assert_eq!(terminal.len(), 3);
        // Paused is neither active nor terminal.
        assert!(!DownloadState::Paused.is_active());
        assert!(!DownloadState::Paused.is_terminal());
    }

    #[test]
    fn progress_fraction() {
        let p = TaskProgress {
            downloaded: 250,
            total: Some(1000),
        };
        assert_eq!(p.fraction(), Some(0.25));
        let unknown = TaskProgress {
            downloaded: 10,
            total: None,
        };
        assert_eq!(unknown.fraction(), None);
        let empty = TaskProgress {
            downloaded: 0,
            total: Some(0),
        };
        assert_eq!(empty.fraction(), Some(1.0));
    }

    #[test]
    fn state_serializes_tagged() {
        let s = DownloadState::Failed {
            error: DownloadError::Http {
                code: 404,
                retry_after: None,
            },
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"state\":\"failed\""));
        assert!(json.contains("404"));
    }
}
