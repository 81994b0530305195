use crate::config::EngineConfig;
use crate::limiter::SpeedLimit;
use crate::state::DownloadState;
use serde::Serialize;
use std::collections::HashMap;

/// Point-in-time snapshot of one task, for listings and get-by-id.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub url: String,
    pub dest_path: String,
    pub state: DownloadState,
    pub downloaded: u64,
    pub total_bytes: Option<u64>,
    /// Current concurrent connections (may be lower than requested after
    /// rate-limit degradation).
    pub connections: usize,
    pub priority: i32,
    /// Unix seconds.
    pub created_at: u64,
}

impl TaskStatus {
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes?;
        if total == 0 {
            return Some(1.0);
        }
        Some(self.downloaded as f64 / total as f64)
    }
}

/// Process-wide status: task counts by state plus the effective config.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub tasks: usize,
    pub counts: HashMap<String, usize>,
    pub global_limit: SpeedLimit,
    pub config: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_handles_unknown_and_zero_totals() {
        let mut s = TaskStatus {
            task_id: "t".into(),
            url: "https://example.com/f".into(),
            dest_path: "/tmp/f".into(),
            state: DownloadState::Pending,
            downloaded: 250,
            total_bytes: Some(1000),
            connections: 4,
            priority: 0,
            created_at: 0,
        };
        assert_eq!(s.fraction(), Some(0.25));
        s.total_bytes = None;
        assert_eq!(s.fraction(), None);
        s.total_bytes = Some(0);
        assert_eq!(s.fraction(), Some(1.0));
    }
}
