//! Per-task bookkeeping owned by the coordination actor.

use crate::engine::TaskStatus;
use crate::limiter::{SpeedLimit, TokenBucket};
use crate::planner::Segment;
use crate::request::DownloadRequest;
use crate::scheduler::HostKey;
use crate::state::DownloadState;
use crate::storage::Storage;
use crate::store::DownloadMetadata;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// What the coordinator wants a task's workers to do once they stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    Run,
    Pause,
    /// Scheduler took the slot back; drain, then requeue.
    Revoke,
    Cancel,
}

pub(crate) struct TaskEntry {
    pub request: DownloadRequest,
    pub host: HostKey,
    pub created_at: u64,
    pub priority: i32,
    pub state: DownloadState,
    pub state_tx: watch::Sender<DownloadState>,
    pub segments_tx: watch::Sender<Vec<Segment>>,
    pub meta: Option<DownloadMetadata>,
    pub storage: Option<Arc<dyn Storage>>,
    pub bucket: Arc<TokenBucket>,
    pub stop: Arc<AtomicBool>,
    pub stop_notify: Arc<Notify>,
    pub intent: Intent,
    /// Segment indices with a live worker.
    pub active: HashSet<usize>,
    /// Incomplete segments waiting for a worker slot.
    pub pending: VecDeque<usize>,
    /// Consecutive retryable failures per segment; cleared on progress.
    pub attempts: HashMap<usize, u32>,
    /// Concurrent workers this task may run now; degraded on 429, reset to
    /// the requested count on a fresh resume.
    pub connections: usize,
    pub probing: bool,
    pub last_persist: Instant,
    pub last_progress_event: Instant,
}

impl TaskEntry {
    pub fn new(
        request: DownloadRequest,
        host: HostKey,
        created_at: u64,
        state_tx: watch::Sender<DownloadState>,
        segments_tx: watch::Sender<Vec<Segment>>,
    ) -> Self {
        let connections = request.connections;
        let priority = request.priority;
        Self {
            request,
            host,
            created_at,
            priority,
            state: DownloadState::Pending,
            state_tx,
            segments_tx,
            meta: None,
            storage: None,
            bucket: Arc::new(TokenBucket::new(SpeedLimit::Unlimited)),
            stop: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            intent: Intent::Run,
            active: HashSet::new(),
            pending: VecDeque::new(),
            attempts: HashMap::new(),
            connections,
            probing: false,
            last_persist: Instant::now(),
            last_progress_event: Instant::now(),
        }
    }

    /// Ask running workers to stop at their next chunk boundary and record
    /// why. Notify interrupts workers blocked on network or token waits.
    pub fn signal_stop(&mut self, intent: Intent) {
        self.intent = intent;
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Arm the entry for a new round of workers.
    pub fn arm(&mut self) {
        self.intent = Intent::Run;
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn downloaded(&self) -> u64 {
        self.meta.as_ref().map(|m| m.downloaded_bytes()).unwrap_or(0)
    }

    pub fn total(&self) -> Option<u64> {
        self.meta.as_ref().and_then(|m| m.total_bytes)
    }

    pub fn status(&self, task_id: &str) -> TaskStatus {
        TaskStatus {
            task_id: task_id.to_string(),
            url: self.request.url.clone(),
            dest_path: self.request.dest_path.clone(),
            state: self.state.clone(),
            downloaded: self.downloaded(),
            total_bytes: self.total(),
            connections: self.connections,
            priority: self.priority,
            created_at: self.created_at,
        }
    }
}
