//! Engine event feed.
//!
//! Every task transition goes out on a broadcast channel; subscribers that
//! fall behind the backlog lose the oldest events, never the engine's time.

use crate::request::TaskId;
use crate::state::DownloadState;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Task accepted by the engine.
    Created,
    /// Task moved to a new lifecycle state.
    StateChanged,
    /// Downloaded byte count advanced.
    Progress,
    /// Task removed; no further events for this id.
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub event_type: EventType,
    pub state: DownloadState,
}

impl TaskEvent {
    pub fn new(task_id: impl Into<TaskId>, event_type: EventType, state: DownloadState) -> Self {
        Self {
            task_id: task_id.into(),
            event_type,
            state,
        }
    }
}

/// Broadcast fan-out for task events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(backlog: usize) -> Self {
        let (tx, _) = broadcast::channel(backlog.max(1));
        Self { tx }
    }

    /// Publish an event. Fine with zero subscribers.
    pub fn publish(&self, event: TaskEvent) {
        tracing::trace!(
            task_id = %event.task_id,
            event_type = ?event.event_type,
            state = event.state.label(),
            "event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to events for a single task.
    pub fn subscribe_task(&self, task_id: &str) -> TaskEventFeed {
        TaskEventFeed {
            task_id: task_id.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

/// Per-task view over the broadcast feed.
pub struct TaskEventFeed {
    task_id: TaskId,
    rx: broadcast::Receiver<TaskEvent>,
}

impl TaskEventFeed {
    /// Next event for this task. Returns None once the engine is gone.
    /// Lagged receivers skip to the oldest retained event and keep going.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) if ev.task_id == self.task_id => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(task_id = %self.task_id, skipped, "event feed lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, ty: EventType) -> TaskEvent {
        TaskEvent::new(id, ty, DownloadState::Pending)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(ev("t1", EventType::Created));
        assert_eq!(a.recv().await.unwrap().task_id, "t1");
        assert_eq!(b.recv().await.unwrap().task_id, "t1");
    }

    #[tokio::test]
    async fn task_feed_filters_other_tasks() {
        let bus = EventBus::new(8);
        let mut feed = bus.subscribe_task("t2");
        bus.publish(ev("t1", EventType::Created));
        bus.publish(ev("t2", EventType::Created));
        bus.publish(ev("t1", EventType::Removed));
        bus.publish(ev("t2", EventType::Removed));
        assert_eq!(feed.recv().await.unwrap().event_type, EventType::Created);
        assert_eq!(feed.recv().await.unwrap().event_type, EventType::Removed);
    }

    #[tokio::test]
    async fn feed_ends_when_bus_dropped() {
        let bus = EventBus::new(8);
        let mut feed = bus.subscribe_task("t1");
        drop(bus);
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(ev("t1", EventType::Progress));
    }

    #[tokio::test]
    async fn lagged_subscriber_recovers() {
        let bus = EventBus::new(2);
        let mut feed = bus.subscribe_task("t1");
        for _ in 0..5 {
            bus.publish(ev("t1", EventType::Progress));
        }
        bus.publish(ev("t1", EventType::Removed));
        // Oldest events are gone but the feed keeps delivering the rest.
        let mut last = None;
        while let Some(ev) = feed.recv().await {
            let done = ev.event_type == EventType::Removed;
            last = Some(ev);
            if done {
                break;
            }
        }
        assert_eq!(last.unwrap().event_type, EventType::Removed);
    }
}
