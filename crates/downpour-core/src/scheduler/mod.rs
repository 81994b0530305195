//! Admission control.
//!
//! The scheduler decides which queued tasks may run, bounded by the global
//! concurrent-download limit and a per-host connection cap. It is plain data
//! owned by the engine actor; all mutation happens on the coordination task.

mod host;

pub use host::HostKey;

use crate::request::TaskId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct WaitingTask {
    task_id: TaskId,
    priority: i32,
    seq: u64,
    host: HostKey,
    connections: usize,
}

#[derive(Debug, Clone)]
struct RunningTask {
    priority: i32,
    seq: u64,
    host: HostKey,
    connections: usize,
}

/// A task cleared to start, with the connection count the host cap allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub task_id: TaskId,
    pub connections: usize,
}

/// Outcome of a scheduling pass. Revocations must be applied first: the
/// revoked task's workers drain, the caller releases its slot and re-queues
/// it, then starts the admitted tasks.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchedulerPlan {
    pub start: Vec<Admission>,
    pub revoke: Vec<TaskId>,
}

impl SchedulerPlan {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.revoke.is_empty()
    }
}

#[derive(Debug)]
pub struct Scheduler {
    max_concurrent: usize,
    max_per_host: usize,
    waiting: Vec<WaitingTask>,
    running: HashMap<TaskId, RunningTask>,
    host_conns: HashMap<HostKey, usize>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(max_concurrent: usize, max_per_host: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            max_per_host: max_per_host.max(1),
            waiting: Vec::new(),
            running: HashMap::new(),
            host_conns: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Queue a task for admission. FIFO within a priority level.
    pub fn enqueue(&mut self, task_id: &str, priority: i32, host: HostKey, connections: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waiting.push(WaitingTask {
            task_id: task_id.to_string(),
            priority,
            seq,
            host,
            connections: connections.max(1),
        });
        self.sort_waiting();
    }

    pub fn remove_waiting(&mut self, task_id: &str) {
        self.waiting.retain(|w| w.task_id != task_id);
    }

    pub fn is_waiting(&self, task_id: &str) -> bool {
        self.waiting.iter().any(|w| w.task_id == task_id)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running.contains_key(task_id)
    }

    /// Free a running task's slot and host connections.
    pub fn release(&mut self, task_id: &str) {
        if let Some(r) = self.running.remove(task_id) {
            self.release_host(&r.host, r.connections);
        }
    }

    /// Reduce the host connection charge for a running task, e.g. after the
    /// task degrades from 4 connections to 2.
    pub fn update_connections(&mut self, task_id: &str, connections: usize) {
        let connections = connections.max(1);
        if let Some(r) = self.running.get_mut(task_id) {
            if connections < r.connections {
                let freed = r.connections - connections;
                r.connections = connections;
                let host = r.host.clone();
                self.release_host(&host, freed);
            }
        }
    }

    pub fn set_priority(&mut self, task_id: &str, priority: i32) {
        if let Some(w) = self.waiting.iter_mut().find(|w| w.task_id == task_id) {
            w.priority = priority;
            self.sort_waiting();
        } else if let Some(r) = self.running.get_mut(task_id) {
            r.priority = priority;
        }
    }

    /// One scheduling pass: fill free slots with the best waiting tasks, and
    /// when slots are full, revoke strictly lower-priority running tasks in
    /// favor of higher-priority waiters.
    pub fn plan(&mut self) -> SchedulerPlan {
        let mut plan = SchedulerPlan::default();

        while self.running.len() < self.max_concurrent {
            match self.take_admissible() {
                Some(adm) => plan.start.push(adm),
                None => break,
            }
        }

        // Preemption: only a strictly higher priority displaces a running
        // task, so equal-priority tasks never churn each other. Each waiter
        // claims at most one victim, so one high-priority arrival never
        // drains the whole running set.
        let mut freed_hosts: HashMap<HostKey, usize> = HashMap::new();
        let waiters: Vec<(i32, HostKey)> = self
            .waiting
            .iter()
            .map(|w| (w.priority, w.host.clone()))
            .collect();
        for (priority, waiter_host) in waiters {
            let victim = match self.lowest_running(&plan.revoke) {
                Some((id, prio)) if priority > prio => id,
                // `waiting` is priority-sorted, so no later waiter outranks
                // the cheapest remaining victim either.
                _ => break,
            };
            // The revocation only helps if the waiter's host has capacity
            // once pending releases (this victim included) are counted.
            let victim_on_host = self
                .running
                .get(&victim)
                .filter(|r| r.host == waiter_host)
                .map(|r| r.connections)
                .unwrap_or(0);
            let freed = freed_hosts.get(&waiter_host).copied().unwrap_or(0);
            let used_after = self
                .host_used(&waiter_host)
                .saturating_sub(freed)
                .saturating_sub(victim_on_host);
            if used_after >= self.max_per_host {
                continue;
            }
            if let Some(r) = self.running.get(&victim) {
                *freed_hosts.entry(r.host.clone()).or_insert(0) += r.connections;
            }
            tracing::debug!(task_id = %victim, "revoking slot for higher-priority task");
            plan.revoke.push(victim);
        }

        plan
    }

    fn sort_waiting(&mut self) {
        self.waiting
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    fn host_used(&self, host: &HostKey) -> usize {
        self.host_conns.get(host).copied().unwrap_or(0)
    }

    fn release_host(&mut self, host: &HostKey, count: usize) {
        if let Some(used) = self.host_conns.get_mut(host) {
            *used = used.saturating_sub(count);
            if *used == 0 {
                self.host_conns.remove(host);
            }
        }
    }

    /// Pop the best-priority waiting task whose host still has capacity,
    /// clamping its connections to what the host cap leaves.
    fn take_admissible(&mut self) -> Option<Admission> {
        let pos = self
            .waiting
            .iter()
            .position(|w| self.host_used(&w.host) < self.max_per_host)?;
        let w = self.waiting.remove(pos);
        let available = self.max_per_host - self.host_used(&w.host);
        let granted = w.connections.min(available);
        *self.host_conns.entry(w.host.clone()).or_insert(0) += granted;
        self.running.insert(
            w.task_id.clone(),
            RunningTask {
                priority: w.priority,
                seq: w.seq,
                host: w.host,
                connections: granted,
            },
        );
        Some(Admission {
            task_id: w.task_id,
            connections: granted,
        })
    }

    fn lowest_running(&self, already_revoked: &[TaskId]) -> Option<(TaskId, i32)> {
        self.running
            .iter()
            .filter(|(id, _)| !already_revoked.contains(id))
            .min_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(id, r)| (id.clone(), r.priority))
    }
}
