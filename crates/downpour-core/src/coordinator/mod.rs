//! The coordination actor.
//!
//! One task per engine drains an `EngineMsg` queue; every state transition,
//! progress aggregate, and admission decision runs here, so task state needs
//! no locks. Workers, probes, and retry timers run elsewhere and only talk
//! back through the queue.

mod commands;
mod entry;
mod transfer;

pub(crate) use entry::Intent;

use crate::config::EngineConfig;
use crate::dispatch::Dispatchers;
use crate::engine::{EngineStatus, TaskStatus};
use crate::error::DownloadError;
use crate::events::{EventBus, EventType, TaskEvent};
use crate::http::{HttpEngine, ResourceInfo};
use crate::limiter::{SpeedLimit, TokenBucket};
use crate::request::{DownloadRequest, TaskId};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::state::DownloadState;
use crate::storage::StorageFactory;
use crate::store::MetadataStore;
use crate::task::DownloadTask;
use crate::worker::WorkerMsg;
use entry::TaskEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Everything that can reach the coordination queue.
pub(crate) enum EngineMsg {
    Cmd(Command),
    Probe {
        task_id: TaskId,
        result: Result<ResourceInfo, DownloadError>,
    },
    Worker {
        task_id: TaskId,
        msg: WorkerMsg,
    },
    /// A retry timer fired for one segment.
    Retry {
        task_id: TaskId,
        index: usize,
    },
}

/// Control-plane requests from the engine facade and task handles.
/// Transition commands reply `true` when they applied and `false` when the
/// requested transition was not reachable; they never error.
pub(crate) enum Command {
    Download {
        request: DownloadRequest,
        reply: oneshot::Sender<Result<DownloadTask, DownloadError>>,
    },
    Start {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Pause {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Resume {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    SetTaskLimit {
        task_id: TaskId,
        limit: SpeedLimit,
        reply: oneshot::Sender<bool>,
    },
    SetPriority {
        task_id: TaskId,
        priority: i32,
        reply: oneshot::Sender<bool>,
    },
    SetGlobalLimit {
        limit: SpeedLimit,
    },
    Status {
        task_id: TaskId,
        reply: oneshot::Sender<Option<TaskStatus>>,
    },
    List {
        reply: oneshot::Sender<Vec<TaskStatus>>,
    },
    EngineStatus {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Rate-limit degradation step: half the connections, floor one.
/// Repeated application from 8 walks 8, 4, 2, 1, 1.
pub(crate) fn reduce_connections(current: usize) -> usize {
    (current / 2).max(1)
}

pub(crate) struct Coordinator {
    cfg: EngineConfig,
    http: Arc<dyn HttpEngine>,
    store: Arc<dyn MetadataStore>,
    storage_factory: Arc<dyn StorageFactory>,
    dispatchers: Dispatchers,
    scheduler: Scheduler,
    events: Arc<EventBus>,
    global_bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
    tasks: HashMap<TaskId, TaskEntry>,
    /// Task ids in creation order, for stable listings.
    order: Vec<TaskId>,
    tx: mpsc::Sender<EngineMsg>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: EngineConfig,
        http: Arc<dyn HttpEngine>,
        store: Arc<dyn MetadataStore>,
        storage_factory: Arc<dyn StorageFactory>,
        dispatchers: Dispatchers,
        events: Arc<EventBus>,
        global_bucket: Arc<TokenBucket>,
        tx: mpsc::Sender<EngineMsg>,
    ) -> Self {
        let scheduler = Scheduler::new(cfg.max_concurrent_downloads, cfg.max_connections_per_host);
        let retry = cfg.retry_policy();
        Self {
            cfg,
            http,
            store,
            storage_factory,
            dispatchers,
            scheduler,
            events,
            global_bucket,
            retry,
            tasks: HashMap::new(),
            order: Vec::new(),
            tx,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<EngineMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMsg::Cmd(Command::Shutdown { reply }) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                EngineMsg::Cmd(cmd) => self.handle_cmd(cmd).await,
                EngineMsg::Probe { task_id, result } => self.on_probe(&task_id, result).await,
                EngineMsg::Worker { task_id, msg } => self.on_worker(&task_id, msg).await,
                EngineMsg::Retry { task_id, index } => self.on_retry(&task_id, index).await,
            }
        }
        tracing::debug!("coordinator stopped");
    }

    /// Persist every active task and signal workers to stop. Partial files
    /// and metadata stay on disk so a later process can resume.
    async fn shutdown(&mut self) {
        let ids: Vec<TaskId> = self.order.clone();
        for id in ids {
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            if entry.state.is_terminal() {
                continue;
            }
            entry.signal_stop(Intent::Pause);
            self.persist(&id, true).await;
        }
        tracing::info!("engine shutdown: active tasks persisted");
    }

    /// Apply a state transition: update the entry, the watch channel, and
    /// the event feed.
    fn set_state(&mut self, task_id: &str, state: DownloadState) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        tracing::debug!(task_id, from = entry.state.label(), to = state.label(), "transition");
        entry.state = state.clone();
        entry.state_tx.send_replace(state.clone());
        self.events.publish(TaskEvent::new(
            task_id.to_string(),
            EventType::StateChanged,
            state,
        ));
    }
}
