//! Control-plane command handling and admission.

use super::entry::{Intent, TaskEntry};
use super::{Command, Coordinator};
use crate::engine::EngineStatus;
use crate::error::DownloadError;
use crate::events::{EventType, TaskEvent};
use crate::request::{DownloadRequest, TaskId};
use crate::scheduler::HostKey;
use crate::state::DownloadState;
use crate::store::unix_timestamp;
use crate::task::DownloadTask;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{oneshot, watch};

impl Coordinator {
    pub(super) async fn handle_cmd(&mut self, cmd: Command) {
        match cmd {
            Command::Download { request, reply } => self.cmd_download(request, reply).await,
            Command::Start { task_id, reply } => {
                let applied = self.cmd_start(&task_id).await;
                let _ = reply.send(applied);
            }
            Command::Pause { task_id, reply } => {
                let applied = self.cmd_pause(&task_id).await;
                let _ = reply.send(applied);
            }
            Command::Resume { task_id, reply } => {
                let applied = self.cmd_resume(&task_id).await;
                let _ = reply.send(applied);
            }
            Command::Cancel { task_id, reply } => {
                let applied = self.cmd_cancel(&task_id).await;
                let _ = reply.send(applied);
            }
            Command::Remove { task_id, reply } => {
                let applied = self.cmd_remove(&task_id).await;
                let _ = reply.send(applied);
            }
            Command::SetTaskLimit {
                task_id,
                limit,
                reply,
            } => {
                let applied = match self.tasks.get(&task_id) {
                    Some(entry) => {
                        entry.bucket.set_limit(limit);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(applied);
            }
            Command::SetPriority {
                task_id,
                priority,
                reply,
            } => {
                let applied = self.cmd_set_priority(&task_id, priority).await;
                let _ = reply.send(applied);
            }
            Command::SetGlobalLimit { limit } => {
                tracing::info!(?limit, "global speed limit changed");
                self.global_bucket.set_limit(limit);
            }
            Command::Status { task_id, reply } => {
                let status = self.tasks.get(&task_id).map(|e| e.status(&task_id));
                let _ = reply.send(status);
            }
            Command::List { reply } => {
                let list = self
                    .order
                    .iter()
                    .filter_map(|id| self.tasks.get(id).map(|e| e.status(id)))
                    .collect();
                let _ = reply.send(list);
            }
            Command::EngineStatus { reply } => {
                let _ = reply.send(self.engine_status());
            }
            // Shutdown is intercepted by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn cmd_download(
        &mut self,
        request: DownloadRequest,
        reply: oneshot::Sender<Result<DownloadTask, DownloadError>>,
    ) {
        if self.tasks.contains_key(&request.task_id) {
            let _ = reply.send(Err(DownloadError::Unknown {
                message: format!("task id already exists: {}", request.task_id),
            }));
            return;
        }
        let host = match HostKey::from_url(&request.url) {
            Ok(h) => h,
            Err(e) => {
                let _ = reply.send(Err(DownloadError::network(e.to_string())));
                return;
            }
        };

        let task_id: TaskId = request.task_id.clone();
        let (state_tx, state_rx) = watch::channel(DownloadState::Pending);
        let (segments_tx, segments_rx) = watch::channel(Vec::new());
        let created_at = unix_timestamp();
        let entry = TaskEntry::new(request.clone(), host, created_at, state_tx, segments_tx);

        tracing::info!(task_id = %task_id, url = %request.url, "task created");
        self.tasks.insert(task_id.clone(), entry);
        self.order.push(task_id.clone());
        self.events.publish(TaskEvent::new(
            task_id.clone(),
            EventType::Created,
            DownloadState::Pending,
        ));

        let handle = DownloadTask::new(
            task_id.clone(),
            request,
            created_at,
            state_rx,
            segments_rx,
            self.tx.clone(),
        );
        let _ = reply.send(Ok(handle));

        if self.cfg.auto_start {
            self.enqueue_task(&task_id).await;
        }
    }

    async fn cmd_start(&mut self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(e) if e.state == DownloadState::Pending => {
                self.enqueue_task(task_id).await;
                true
            }
            _ => false,
        }
    }

    async fn cmd_pause(&mut self, task_id: &str) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        match entry.state {
            DownloadState::Downloading { .. } | DownloadState::Scheduled => {
                entry.signal_stop(Intent::Pause);
                let idle = entry.active.is_empty() && !entry.probing;
                if idle {
                    self.maybe_drained(task_id).await;
                }
                true
            }
            DownloadState::Queued => {
                self.scheduler.remove_waiting(task_id);
                self.persist(task_id, true).await;
                self.set_state(task_id, DownloadState::Paused);
                true
            }
            _ => false,
        }
    }

    async fn cmd_resume(&mut self, task_id: &str) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        match entry.state {
            // Degradation applies to one continuous attempt only, so a
            // fresh resume starts back at the requested connection count.
            DownloadState::Paused | DownloadState::Failed { .. } => {
                entry.connections = entry.request.connections;
                entry.attempts.clear();
                entry.arm();
                self.enqueue_task(task_id).await;
                true
            }
            _ => false,
        }
    }

    async fn cmd_cancel(&mut self, task_id: &str) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        match entry.state {
            DownloadState::Downloading { .. } | DownloadState::Scheduled => {
                entry.signal_stop(Intent::Cancel);
                let idle = entry.active.is_empty() && !entry.probing;
                if idle {
                    self.maybe_drained(task_id).await;
                }
                true
            }
            DownloadState::Queued => {
                self.scheduler.remove_waiting(task_id);
                self.finish_cancel(task_id).await;
                true
            }
            DownloadState::Pending | DownloadState::Paused => {
                self.finish_cancel(task_id).await;
                true
            }
            _ => false,
        }
    }

    async fn cmd_remove(&mut self, task_id: &str) -> bool {
        let Some(entry) = self.tasks.get(task_id) else {
            return false;
        };
        if !entry.state.is_terminal() {
            tracing::debug!(task_id, "remove refused: task not in a terminal state");
            return false;
        }
        let last_state = entry.state.clone();
        self.store.clear(task_id).await;
        self.tasks.remove(task_id);
        self.order.retain(|id| id != task_id);
        self.events.publish(TaskEvent::new(
            task_id.to_string(),
            EventType::Removed,
            last_state,
        ));
        true
    }

    async fn cmd_set_priority(&mut self, task_id: &str, priority: i32) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        entry.priority = priority;
        self.scheduler.set_priority(task_id, priority);
        // A bumped waiter may now deserve a running task's slot.
        self.reschedule().await;
        true
    }

    fn engine_status(&self) -> EngineStatus {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.tasks.values() {
            *counts.entry(entry.state.label().to_string()).or_insert(0) += 1;
        }
        EngineStatus {
            tasks: self.tasks.len(),
            counts,
            global_limit: self.global_bucket.limit(),
            config: self.cfg.clone(),
        }
    }

    /// Hand a task to the scheduler and run an admission pass.
    pub(super) async fn enqueue_task(&mut self, task_id: &str) {
        let Some(entry) = self.tasks.get(task_id) else {
            return;
        };
        let (priority, host, connections) =
            (entry.priority, entry.host.clone(), entry.connections);
        self.set_state(task_id, DownloadState::Queued);
        self.scheduler.enqueue(task_id, priority, host, connections);
        self.reschedule().await;
    }

    /// One admission pass: revoke slots the scheduler reclaimed, start the
    /// tasks it admitted. Boxed because draining a revoked task can schedule
    /// again (`revoke → maybe_drained → reschedule`), and that cycle needs
    /// heap indirection to have a finite future type.
    pub(super) fn reschedule(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let plan = self.scheduler.plan();
            for id in plan.revoke {
                self.revoke(&id).await;
            }
            for adm in plan.start {
                self.admit(&adm.task_id, adm.connections).await;
            }
        })
    }

    async fn revoke(&mut self, task_id: &str) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            self.scheduler.release(task_id);
            return;
        };
        // A pause or cancel already draining this task frees the slot on
        // its own; don't turn it into a requeue.
        if entry.intent == Intent::Run {
            entry.signal_stop(Intent::Revoke);
        }
        let idle = entry.active.is_empty() && !entry.probing;
        if idle {
            self.maybe_drained(task_id).await;
        }
    }

    async fn admit(&mut self, task_id: &str, granted: usize) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            self.scheduler.release(task_id);
            return;
        };
        entry.arm();
        entry.connections = entry.connections.min(granted).max(1);
        let needs_load = entry.meta.is_none();
        self.set_state(task_id, DownloadState::Scheduled);

        if needs_load {
            let loaded = self.store.load(task_id).await;
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            if let Some(m) = loaded {
                // Only trust a record written for this exact request.
                if m.url == entry.request.url
                    && m.dest_path == entry.request.dest_path
                    && !m.segments.is_empty()
                {
                    tracing::info!(task_id, downloaded = m.downloaded_bytes(), "resuming");
                    entry.meta = Some(m);
                }
            }
        }

        let has_meta = self
            .tasks
            .get(task_id)
            .is_some_and(|e| e.meta.is_some());
        if has_meta {
            self.start_workers(task_id, true).await;
        } else {
            self.spawn_probe(task_id);
        }
    }
}
