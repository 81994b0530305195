//! The engine facade.
//!
//! `DownloadEngine` owns a single coordination actor; every method is a
//! message to that actor. Control operations reply `true` when the
//! transition applied and `false` otherwise, never an error; transfer
//! failures are observed through task state instead.

mod status;

pub use status::{EngineStatus, TaskStatus};

use crate::client::ReqwestEngine;
use crate::config::EngineConfig;
use crate::coordinator::{Command, Coordinator, EngineMsg};
use crate::dispatch::Dispatchers;
use crate::error::DownloadError;
use crate::events::{EventBus, TaskEvent, TaskEventFeed};
use crate::http::HttpEngine;
use crate::limiter::{SpeedLimit, TokenBucket};
use crate::request::DownloadRequest;
use crate::storage::{FileStorageFactory, StorageFactory};
use crate::store::{JsonFileStore, MetadataStore};
use crate::task::DownloadTask;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Builds an engine with custom components; the defaults are the real
/// reqwest client, JSON metadata under the XDG state dir, and direct file
/// storage.
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    http: Option<Arc<dyn HttpEngine>>,
    store: Option<Arc<dyn MetadataStore>>,
    storage_factory: Option<Arc<dyn StorageFactory>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpEngine>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn storage_factory(mut self, factory: Arc<dyn StorageFactory>) -> Self {
        self.storage_factory = Some(factory);
        self
    }

    /// Spawn the coordination actor and hand back the facade. Must be
    /// called from within a tokio runtime.
    pub fn build(self) -> Result<DownloadEngine> {
        let cfg = self.config.unwrap_or_default();
        let dispatchers = Dispatchers::from_config(&cfg);
        let http: Arc<dyn HttpEngine> = match self.http {
            Some(h) => h,
            None => Arc::new(ReqwestEngine::new()?),
        };
        let store: Arc<dyn MetadataStore> = match self.store {
            Some(s) => s,
            None => Arc::new(JsonFileStore::open_default()?),
        };
        let storage_factory: Arc<dyn StorageFactory> = match self.storage_factory {
            Some(f) => f,
            None => Arc::new(FileStorageFactory::new(dispatchers.io.clone())),
        };
        let events = Arc::new(EventBus::new(cfg.event_backlog));
        let global_bucket = Arc::new(TokenBucket::new(cfg.global_limit()));

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let coordinator = Coordinator::new(
            cfg,
            http,
            store,
            storage_factory,
            dispatchers,
            events.clone(),
            global_bucket,
            tx.clone(),
        );
        tokio::spawn(coordinator.run(rx));

        Ok(DownloadEngine { tx, events })
    }
}

/// Handle to a running download engine. Cheap to clone; all clones talk to
/// the same coordinator.
#[derive(Clone)]
pub struct DownloadEngine {
    tx: mpsc::Sender<EngineMsg>,
    events: Arc<EventBus>,
}

impl DownloadEngine {
    /// Engine with default components and config loaded from disk when
    /// present.
    pub fn new() -> Result<Self> {
        EngineBuilder::new().build()
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new().config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a task. With `auto_start` it is queued for admission
    /// immediately; otherwise it stays pending until `start`.
    pub async fn download(&self, request: DownloadRequest) -> Result<DownloadTask, DownloadError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Cmd(Command::Download { request, reply }))
            .await
            .map_err(|_| engine_stopped())?;
        rx.await.map_err(|_| engine_stopped())?
    }

    pub async fn start(&self, task_id: &str) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::Start { task_id, reply }).await
    }

    pub async fn pause(&self, task_id: &str) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::Pause { task_id, reply }).await
    }

    pub async fn resume(&self, task_id: &str) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::Resume { task_id, reply }).await
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::Cancel { task_id, reply }).await
    }

    pub async fn remove(&self, task_id: &str) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::Remove { task_id, reply }).await
    }

    pub async fn set_task_limit(&self, task_id: &str, limit: SpeedLimit) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::SetTaskLimit {
            task_id,
            limit,
            reply,
        })
        .await
    }

    pub async fn set_priority(&self, task_id: &str, priority: i32) -> bool {
        let task_id = task_id.to_string();
        self.transition(|reply| Command::SetPriority {
            task_id,
            priority,
            reply,
        })
        .await
    }

    pub async fn set_global_limit(&self, limit: SpeedLimit) {
        let _ = self
            .tx
            .send(EngineMsg::Cmd(Command::SetGlobalLimit { limit }))
            .await;
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Status {
            task_id: task_id.to_string(),
            reply,
        };
        self.tx.send(EngineMsg::Cmd(cmd)).await.ok()?;
        rx.await.ok()?
    }

    /// All known tasks in creation order.
    pub async fn list(&self) -> Vec<TaskStatus> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineMsg::Cmd(Command::List { reply }))
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn engine_status(&self) -> Option<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Cmd(Command::EngineStatus { reply }))
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Feed of every task event.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Feed filtered to one task id.
    pub fn subscribe_task(&self, task_id: &str) -> TaskEventFeed {
        self.events.subscribe_task(task_id)
    }

    /// Stop the coordinator. Active tasks are persisted, not canceled, so a
    /// later engine can resume them.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineMsg::Cmd(Command::Shutdown { reply }))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    async fn transition(&self, make: impl FnOnce(oneshot::Sender<bool>) -> Command) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineMsg::Cmd(make(reply))).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

fn engine_stopped() -> DownloadError {
    DownloadError::Unknown {
        message: "engine stopped".into(),
    }
}
