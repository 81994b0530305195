//! Segment worker: one transfer loop per connection.
//!
//! A worker fetches its segment's remaining byte range, writes each chunk at
//! its absolute offset, reports progress deltas to the coordinator, then
//! pays the speed gate and checks the stop flag. It never mutates task
//! state; terminal outcomes go back as a single `WorkerMsg`.

use crate::coordinator::EngineMsg;
use crate::error::DownloadError;
use crate::http::HttpEngine;
use crate::limiter::SpeedGate;
use crate::planner::Segment;
use crate::request::TaskId;
use crate::storage::Storage;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, Semaphore};

#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// `bytes` newly written since the last report.
    Progress { index: usize, bytes: u64 },
    /// Segment finished its full range (or the open-ended stream ended).
    Done { index: usize },
    /// Stopped at a chunk boundary because the stop flag was raised.
    Stopped { index: usize },
    Failed { index: usize, error: DownloadError },
}

impl WorkerMsg {
    pub(crate) fn index(&self) -> usize {
        match self {
            WorkerMsg::Progress { index, .. }
            | WorkerMsg::Done { index }
            | WorkerMsg::Stopped { index }
            | WorkerMsg::Failed { index, .. } => *index,
        }
    }
}

/// Everything a segment worker needs, cloned cheaply out of the task entry.
pub(crate) struct SegmentWorker {
    pub task_id: TaskId,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub segment: Segment,
    pub http: Arc<dyn HttpEngine>,
    pub storage: Arc<dyn Storage>,
    pub gate: SpeedGate,
    pub network: Arc<Semaphore>,
    /// Upper bound on a single write; oversized transport chunks are split
    /// so progress reports and limiter grants stay bounded.
    pub buffer_size: usize,
    /// Raised for pause, cancel, and slot revocation alike; the coordinator
    /// knows which intent raised it.
    pub stop: Arc<AtomicBool>,
    pub stop_notify: Arc<Notify>,
    pub tx: mpsc::Sender<EngineMsg>,
}

/// Select `$fut` against the task's stop signal. Registers notify interest
/// first and re-checks the flag, so a stop raised between iterations cannot
/// be missed.
macro_rules! or_stopped {
    ($self:ident, $index:ident, $fut:expr) => {{
        let notified = $self.stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if $self.stop.load(Ordering::SeqCst) {
            return WorkerMsg::Stopped { index: $index };
        }
        tokio::select! {
            _ = notified => return WorkerMsg::Stopped { index: $index },
            out = $fut => out,
        }
    }};
}

impl SegmentWorker {
    pub(crate) fn spawn(self) {
        tokio::spawn(async move {
            let task_id = self.task_id.clone();
            let tx = self.tx.clone();
            let msg = self.run().await;
            let _ = tx.send(EngineMsg::Worker { task_id, msg }).await;
        });
    }

    async fn run(self) -> WorkerMsg {
        let index = self.segment.index;

        // Wait for a network slot, but give up immediately on stop.
        let permit = or_stopped!(self, index, self.network.acquire());
        let _permit = match permit {
            Ok(p) => p,
            Err(_) => return WorkerMsg::Stopped { index },
        };

        let range = if self.segment.open_ended() {
            None
        } else {
            let start = self.segment.next_offset();
            if start > self.segment.end {
                return WorkerMsg::Done { index };
            }
            Some((start, self.segment.end))
        };

        let opened = or_stopped!(
            self,
            index,
            self.http.fetch_range(&self.url, &self.headers, range)
        );
        let stream = match opened {
            Ok(s) => s,
            Err(error) => return WorkerMsg::Failed { index, error },
        };

        self.drain(stream).await
    }

    async fn drain(&self, mut stream: crate::http::ByteStream) -> WorkerMsg {
        let index = self.segment.index;
        let mut offset = self.segment.next_offset();

        loop {
            let chunk = or_stopped!(self, index, stream.next());
            let mut chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(error)) => return WorkerMsg::Failed { index, error },
                None => break,
            };
            if chunk.is_empty() {
                continue;
            }

            // A known-length segment never writes past its end, even if the
            // server over-delivers.
            if !self.segment.open_ended() {
                let remaining = (self.segment.end - offset + 1) as usize;
                if chunk.len() > remaining {
                    chunk.truncate(remaining);
                }
            }

            for part in chunk.chunks(self.buffer_size.max(1)) {
                if let Err(error) = self.storage.write_at(offset, part).await {
                    return WorkerMsg::Failed { index, error };
                }
                let written = part.len() as u64;
                offset += written;

                let report = EngineMsg::Worker {
                    task_id: self.task_id.clone(),
                    msg: WorkerMsg::Progress {
                        index,
                        bytes: written,
                    },
                };
                if self.tx.send(report).await.is_err() {
                    return WorkerMsg::Stopped { index };
                }

                if !self.segment.open_ended() && offset > self.segment.end {
                    return WorkerMsg::Done { index };
                }

                or_stopped!(self, index, self.gate.acquire(written));
            }
        }

        // Stream ended. Open-ended segments complete here; a ranged segment
        // that stopped short lost its connection mid-body.
        if self.segment.open_ended() || offset > self.segment.end {
            WorkerMsg::Done { index }
        } else {
            WorkerMsg::Failed {
                index,
                error: DownloadError::network(format!(
                    "connection closed early at offset {} of {}",
                    offset, self.segment.end
                )),
            }
        }
    }
}
