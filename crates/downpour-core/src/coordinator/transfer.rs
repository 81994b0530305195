//! Data-plane handling: probe results, worker messages, retries, and task
//! completion. Everything here runs on the coordination actor.

use super::entry::Intent;
use super::{reduce_connections, Coordinator, EngineMsg};
use crate::error::DownloadError;
use crate::events::{EventType, TaskEvent};
use crate::http::ResourceInfo;
use crate::limiter::SpeedGate;
use crate::planner::plan_segments;
use crate::state::{DownloadState, TaskProgress};
use crate::storage::temp_path;
use crate::store::{unix_timestamp, DownloadMetadata};
use crate::worker::{SegmentWorker, WorkerMsg};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

impl Coordinator {
    pub(super) fn spawn_probe(&mut self, task_id: &str) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        entry.probing = true;
        let url = entry.request.url.clone();
        let headers = entry.request.headers.clone();
        let http = self.http.clone();
        let tx = self.tx.clone();
        let task_id = task_id.to_string();
        tracing::debug!(task_id = %task_id, "probing");
        tokio::spawn(async move {
            let result = http.probe(&url, &headers).await;
            let _ = tx.send(EngineMsg::Probe { task_id, result }).await;
        });
    }

    pub(super) async fn on_probe(
        &mut self,
        task_id: &str,
        result: Result<ResourceInfo, DownloadError>,
    ) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        entry.probing = false;

        // A control intent raised mid-probe wins over the result.
        match entry.intent {
            Intent::Run => {}
            _ => {
                self.maybe_drained(task_id).await;
                return;
            }
        }

        let info = match result {
            Ok(info) => info,
            Err(e) => {
                self.fail_task(task_id, e).await;
                return;
            }
        };

        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        let segments = plan_segments(info.content_length, info.accept_ranges, entry.connections);
        tracing::info!(
            task_id,
            total = ?info.content_length,
            ranges = info.accept_ranges,
            segments = segments.len(),
            "planned"
        );
        entry.segments_tx.send_replace(segments.clone());
        entry.meta = Some(DownloadMetadata {
            task_id: task_id.to_string(),
            url: entry.request.url.clone(),
            dest_path: entry.request.dest_path.clone(),
            total_bytes: info.content_length,
            accept_ranges: info.accept_ranges,
            etag: info.etag,
            last_modified: info.last_modified,
            segments,
            created_at: entry.created_at,
            updated_at: unix_timestamp(),
        });
        self.persist(task_id, true).await;
        self.start_workers(task_id, false).await;
    }

    /// Open storage, rebuild the pending queue from incomplete segments,
    /// and spawn the first round of workers.
    pub(super) async fn start_workers(&mut self, task_id: &str, resume: bool) {
        let open_err = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            if entry.storage.is_none() {
                let dest = PathBuf::from(&entry.request.dest_path);
                match self.storage_factory.open(&dest, resume) {
                    Ok(s) => {
                        entry.storage = Some(s);
                        None
                    }
                    Err(e) => Some(e),
                }
            } else {
                None
            }
        };
        if let Some(e) = open_err {
            self.fail_task(task_id, e).await;
            return;
        }

        if !resume {
            let prealloc = {
                let Some(entry) = self.tasks.get(task_id) else {
                    return;
                };
                match (entry.storage.clone(), entry.total()) {
                    (Some(s), Some(total)) if total > 0 => Some((s, total)),
                    _ => None,
                }
            };
            if let Some((storage, total)) = prealloc {
                if let Err(e) = storage.preallocate(total).await {
                    self.fail_task(task_id, e).await;
                    return;
                }
            }
        }

        let all_done = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            let Some(meta) = entry.meta.as_ref() else {
                return;
            };
            entry.pending = meta
                .segments
                .iter()
                .filter(|s| !s.complete)
                .map(|s| s.index)
                .collect();
            entry.active.clear();
            entry.pending.is_empty()
        };
        if all_done {
            self.complete_task(task_id).await;
            return;
        }

        let progress = {
            let Some(entry) = self.tasks.get(task_id) else {
                return;
            };
            TaskProgress {
                downloaded: entry.downloaded(),
                total: entry.total(),
            }
        };
        self.set_state(task_id, DownloadState::Downloading { progress });
        self.fill_slots(task_id);
    }

    /// Spawn workers for pending segments until the task's connection count
    /// is saturated.
    pub(super) fn fill_slots(&mut self, task_id: &str) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        if entry.intent != Intent::Run {
            return;
        }
        let Some(storage) = entry.storage.clone() else {
            return;
        };
        while entry.active.len() < entry.connections {
            let Some(index) = entry.pending.pop_front() else {
                break;
            };
            let Some(segment) = entry
                .meta
                .as_ref()
                .and_then(|m| m.segments.iter().find(|s| s.index == index))
                .copied()
            else {
                continue;
            };
            if segment.complete {
                continue;
            }
            entry.active.insert(index);
            tracing::debug!(task_id, index, offset = segment.next_offset(), "worker spawn");
            SegmentWorker {
                task_id: task_id.to_string(),
                url: entry.request.url.clone(),
                headers: entry.request.headers.clone(),
                segment,
                http: self.http.clone(),
                storage: storage.clone(),
                gate: SpeedGate::new(self.global_bucket.clone(), entry.bucket.clone()),
                network: self.dispatchers.network.clone(),
                buffer_size: self.cfg.buffer_size,
                stop: entry.stop.clone(),
                stop_notify: entry.stop_notify.clone(),
                tx: self.tx.clone(),
            }
            .spawn();
        }
    }

    pub(super) async fn on_worker(&mut self, task_id: &str, msg: WorkerMsg) {
        {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            // Late messages from workers of an already-terminal task.
            if entry.state.is_terminal() {
                entry.active.remove(&msg.index());
                return;
            }
        }
        match msg {
            WorkerMsg::Progress { index, bytes } => self.on_progress(task_id, index, bytes).await,
            WorkerMsg::Done { index } => self.on_done(task_id, index).await,
            WorkerMsg::Stopped { index } => self.on_stopped(task_id, index).await,
            WorkerMsg::Failed { index, error } => self.on_failed(task_id, index, error).await,
        }
    }

    async fn on_progress(&mut self, task_id: &str, index: usize, bytes: u64) {
        let mut emit_event = None;
        {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            if entry.intent == Intent::Cancel {
                return;
            }
            let Some(meta) = entry.meta.as_mut() else {
                return;
            };
            if let Some(seg) = meta.segments.iter_mut().find(|s| s.index == index) {
                seg.downloaded += bytes;
            }
            // Forward progress resets the segment's failure streak.
            entry.attempts.remove(&index);

            let segments = entry
                .meta
                .as_ref()
                .map(|m| m.segments.clone())
                .unwrap_or_default();
            entry.segments_tx.send_replace(segments);

            if matches!(entry.state, DownloadState::Downloading { .. }) {
                let progress = TaskProgress {
                    downloaded: entry.downloaded(),
                    total: entry.total(),
                };
                let state = DownloadState::Downloading { progress };
                entry.state = state.clone();
                entry.state_tx.send_replace(state.clone());
                if entry.last_progress_event.elapsed() >= self.cfg.progress_interval() {
                    entry.last_progress_event = Instant::now();
                    emit_event = Some(state);
                }
            }
        }
        if let Some(state) = emit_event {
            self.events.publish(TaskEvent::new(
                task_id.to_string(),
                EventType::Progress,
                state,
            ));
        }
        self.persist(task_id, false).await;
    }

    async fn on_done(&mut self, task_id: &str, index: usize) {
        let (drained, complete) = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            entry.active.remove(&index);
            entry.attempts.remove(&index);
            if let Some(meta) = entry.meta.as_mut() {
                if let Some(seg) = meta.segments.iter_mut().find(|s| s.index == index) {
                    seg.complete = true;
                }
                let segments = meta.segments.clone();
                entry.segments_tx.send_replace(segments);
            }
            let complete = entry
                .meta
                .as_ref()
                .map(|m| m.is_complete())
                .unwrap_or(false);
            (entry.intent != Intent::Run, complete && entry.active.is_empty())
        };
        tracing::debug!(task_id, index, "segment complete");
        self.persist(task_id, true).await;

        if drained {
            self.maybe_drained(task_id).await;
        } else if complete {
            self.complete_task(task_id).await;
        } else {
            self.fill_slots(task_id);
        }
    }

    async fn on_stopped(&mut self, task_id: &str, index: usize) {
        let requeue = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            entry.active.remove(&index);
            entry.intent == Intent::Run
        };
        if requeue {
            // A worker stopped without a stop intent (queue closed mid-send
            // or a stale stop flag); put the segment back in line.
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            entry.pending.push_back(index);
            self.fill_slots(task_id);
        } else {
            self.maybe_drained(task_id).await;
        }
    }

    async fn on_failed(&mut self, task_id: &str, index: usize, error: DownloadError) {
        let decision = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            entry.active.remove(&index);
            if entry.intent != Intent::Run {
                None
            } else {
                let attempt = entry.attempts.get(&index).copied().unwrap_or(0) + 1;
                entry.attempts.insert(index, attempt);
                Some((attempt, entry.connections))
            }
        };
        let Some((attempt, connections)) = decision else {
            self.maybe_drained(task_id).await;
            return;
        };

        // 429 degrades the connection count before the retry decision, so
        // the re-issued segment runs in the smaller worker pool.
        if matches!(error, DownloadError::Http { code: 429, .. }) {
            let reduced = reduce_connections(connections);
            if reduced < connections {
                tracing::warn!(task_id, from = connections, to = reduced, "rate limited, degrading");
                if let Some(entry) = self.tasks.get_mut(task_id) {
                    entry.connections = reduced;
                }
                self.scheduler.update_connections(task_id, reduced);
                self.reschedule().await;
            }
        }

        match self.retry.decide(attempt, &error) {
            Some(delay) => {
                tracing::warn!(
                    task_id,
                    index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "segment failed, retrying"
                );
                let tx = self.tx.clone();
                let task_id = task_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(EngineMsg::Retry { task_id, index }).await;
                });
            }
            None => {
                self.fail_task(task_id, error).await;
            }
        }
    }

    pub(super) async fn on_retry(&mut self, task_id: &str, index: usize) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        if entry.intent != Intent::Run || entry.state.is_terminal() {
            return;
        }
        if entry.active.contains(&index) || entry.pending.contains(&index) {
            return;
        }
        entry.pending.push_back(index);
        self.fill_slots(task_id);
    }

    /// Called whenever a draining task may have lost its last worker;
    /// resolves the recorded intent once nothing is in flight.
    pub(super) async fn maybe_drained(&mut self, task_id: &str) {
        let intent = {
            let Some(entry) = self.tasks.get(task_id) else {
                return;
            };
            if !entry.active.is_empty() || entry.probing {
                return;
            }
            entry.intent
        };
        match intent {
            Intent::Run => {}
            Intent::Pause => {
                self.persist(task_id, true).await;
                self.scheduler.release(task_id);
                self.set_state(task_id, DownloadState::Paused);
                self.reschedule().await;
            }
            Intent::Revoke => {
                self.persist(task_id, true).await;
                self.scheduler.release(task_id);
                self.enqueue_task(task_id).await;
            }
            Intent::Cancel => {
                self.scheduler.release(task_id);
                self.finish_cancel(task_id).await;
                self.reschedule().await;
            }
        }
    }

    /// Teardown is complete: delete the partial file and the resume record,
    /// then mark the task canceled.
    pub(super) async fn finish_cancel(&mut self, task_id: &str) {
        let (storage, dest) = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            (entry.storage.take(), entry.request.dest_path.clone())
        };
        match storage {
            Some(s) => {
                if let Err(e) = s.delete().await {
                    tracing::warn!(task_id, error = %e, "failed to delete partial file");
                }
            }
            None => {
                // Never opened in this process; a stale part file may still
                // exist from an earlier run.
                let part = temp_path(Path::new(&dest));
                if let Err(e) = tokio::fs::remove_file(&part).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(task_id, error = %e, "failed to delete partial file");
                    }
                }
            }
        }
        self.store.clear(task_id).await;
        tracing::info!(task_id, "canceled");
        self.set_state(task_id, DownloadState::Canceled);
    }

    /// All segments complete: verify size, finalize the file, clear the
    /// resume record.
    async fn complete_task(&mut self, task_id: &str) {
        let (storage, total, dest) = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            if entry.storage.is_none() {
                // Zero-length resource: nothing was ever written.
                let dest = PathBuf::from(&entry.request.dest_path);
                match self.storage_factory.open(&dest, false) {
                    Ok(s) => entry.storage = Some(s),
                    Err(e) => {
                        self.fail_task(task_id, e).await;
                        return;
                    }
                }
            }
            let Some(storage) = entry.storage.clone() else {
                return;
            };
            (storage, entry.total(), entry.request.dest_path.clone())
        };

        if let Some(total) = total {
            match storage.size().await {
                Ok(size) if size == total => {}
                Ok(size) => {
                    self.fail_task(
                        task_id,
                        DownloadError::storage(format!(
                            "size mismatch after download: {} != {}",
                            size, total
                        )),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    self.fail_task(task_id, e).await;
                    return;
                }
            }
        }
        if let Err(e) = storage.finalize().await {
            self.fail_task(task_id, e).await;
            return;
        }
        if let Some(entry) = self.tasks.get_mut(task_id) {
            entry.storage = None;
        }
        self.store.clear(task_id).await;
        self.scheduler.release(task_id);
        tracing::info!(task_id, path = %dest, "completed");
        self.set_state(task_id, DownloadState::Completed { path: dest });
        self.reschedule().await;
    }

    pub(super) async fn fail_task(&mut self, task_id: &str, error: DownloadError) {
        tracing::warn!(task_id, error = %error, "task failed");
        {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            // Stop the surviving workers; their late messages are ignored
            // once the state below is terminal.
            entry.stop.store(true, std::sync::atomic::Ordering::SeqCst);
            entry.stop_notify.notify_waiters();
            entry.pending.clear();
        }
        // The resume record stays so an explicit resume can pick up the
        // partial bytes.
        self.persist(task_id, true).await;
        self.scheduler.release(task_id);
        self.set_state(task_id, DownloadState::Failed { error });
        self.reschedule().await;
    }

    /// Save the task's metadata. Unforced saves are rate limited to the
    /// configured persist interval.
    pub(super) async fn persist(&mut self, task_id: &str, force: bool) {
        let snapshot = {
            let Some(entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            let Some(meta) = entry.meta.as_mut() else {
                return;
            };
            if !force && entry.last_persist.elapsed() < self.cfg.persist_interval() {
                return;
            }
            meta.updated_at = unix_timestamp();
            entry.last_persist = Instant::now();
            meta.clone()
        };
        self.store.save(task_id, &snapshot).await;
    }
}
