//! Caller-facing task handle.
//!
//! A handle observes state and segments through watch channels (late
//! subscribers always see the current value) and forwards control intents
//! to the coordinator. It never mutates task state itself.

use crate::coordinator::{Command, EngineMsg};
use crate::error::DownloadError;
use crate::limiter::SpeedLimit;
use crate::planner::Segment;
use crate::request::{DownloadRequest, TaskId};
use crate::state::DownloadState;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Clone)]
pub struct DownloadTask {
    task_id: TaskId,
    request: DownloadRequest,
    created_at: u64,
    state_rx: watch::Receiver<DownloadState>,
    segments_rx: watch::Receiver<Vec<Segment>>,
    tx: mpsc::Sender<EngineMsg>,
}

impl DownloadTask {
    pub(crate) fn new(
        task_id: TaskId,
        request: DownloadRequest,
        created_at: u64,
        state_rx: watch::Receiver<DownloadState>,
        segments_rx: watch::Receiver<Vec<Segment>>,
        tx: mpsc::Sender<EngineMsg>,
    ) -> Self {
        Self {
            task_id,
            request,
            created_at,
            state_rx,
            segments_rx,
            tx,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Unix seconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Current state snapshot.
    pub fn state(&self) -> DownloadState {
        self.state_rx.borrow().clone()
    }

    /// Current segment snapshot; empty until planning.
    pub fn segments(&self) -> Vec<Segment> {
        self.segments_rx.borrow().clone()
    }

    /// Watch receiver for state changes; the current value is readable
    /// immediately.
    pub fn state_watch(&self) -> watch::Receiver<DownloadState> {
        self.state_rx.clone()
    }

    pub fn segments_watch(&self) -> watch::Receiver<Vec<Segment>> {
        self.segments_rx.clone()
    }

    pub async fn start(&self) -> bool {
        self.transition(|task_id, reply| Command::Start { task_id, reply })
            .await
    }

    pub async fn pause(&self) -> bool {
        self.transition(|task_id, reply| Command::Pause { task_id, reply })
            .await
    }

    pub async fn resume(&self) -> bool {
        self.transition(|task_id, reply| Command::Resume { task_id, reply })
            .await
    }

    pub async fn cancel(&self) -> bool {
        self.transition(|task_id, reply| Command::Cancel { task_id, reply })
            .await
    }

    pub async fn remove(&self) -> bool {
        self.transition(|task_id, reply| Command::Remove { task_id, reply })
            .await
    }

    pub async fn set_speed_limit(&self, limit: SpeedLimit) -> bool {
        self.transition(|task_id, reply| Command::SetTaskLimit {
            task_id,
            limit,
            reply,
        })
        .await
    }

    pub async fn set_priority(&self, priority: i32) -> bool {
        self.transition(|task_id, reply| Command::SetPriority {
            task_id,
            priority,
            reply,
        })
        .await
    }

    /// Wait for a terminal state: the destination path on success, the
    /// classified error on failure, `Canceled` after a cancel.
    pub async fn await_completion(&self) -> Result<String, DownloadError> {
        let mut rx = self.state_rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                DownloadState::Completed { path } => return Ok(path),
                DownloadState::Failed { error } => return Err(error),
                DownloadState::Canceled => return Err(DownloadError::Canceled),
                _ => {}
            }
            if rx.changed().await.is_err() {
                // Task removed or engine gone before a terminal state.
                return Err(DownloadError::Canceled);
            }
        }
    }

    async fn transition(
        &self,
        make: impl FnOnce(TaskId, oneshot::Sender<bool>) -> Command,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = make(self.task_id.clone(), reply);
        if self.tx.send(EngineMsg::Cmd(cmd)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}
