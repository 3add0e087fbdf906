//! Per access-method FIFO of items, paired with at most one worker.

use std::collections::VecDeque;

use crate::item::ItemId;
use crate::worker::Worker;

/// Ordered backlog of pending items for one access method (optionally
/// partitioned by host), plus the worker that drains it.
///
/// Invariant: the worker's in-flight count never exceeds its negotiated
/// pipeline depth; the scheduler only hands items over through
/// [`Queue::next_to_send`].
#[derive(Debug)]
pub struct Queue {
    /// Queue key, `<access>` or `<access>:<host>`.
    pub name: String,
    /// The access method this queue feeds.
    pub access: String,
    backlog: VecDeque<ItemId>,
    pub worker: Option<Worker>,
    /// Set once the method proved unusable; the queue accepts no new worker.
    pub broken: bool,
}

impl Queue {
    pub fn new(name: impl Into<String>, access: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access: access.into(),
            backlog: VecDeque::new(),
            worker: None,
            broken: false,
        }
    }

    /// Append to the tail. Requeued retries also land here, preserving FIFO
    /// order for everything else.
    pub fn push(&mut self, id: ItemId) {
        self.backlog.push_back(id);
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.worker.as_ref().map_or(0, Worker::in_flight_len)
    }

    /// Pending plus unacknowledged items; the scheduler's balance metric.
    pub fn outstanding(&self) -> usize {
        self.backlog_len() + self.in_flight_len()
    }

    /// True when there is nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.in_flight_len() == 0
    }

    /// Pop the head for dispatch, but only while the worker has spare
    /// pipeline capacity.
    pub fn next_to_send(&mut self, depth: usize) -> Option<ItemId> {
        if self.in_flight_len() >= depth {
            return None;
        }
        self.backlog.pop_front()
    }

    /// Put an item back at the head, e.g. when handing it to the worker
    /// failed before the request hit the wire.
    pub fn requeue_front(&mut self, id: ItemId) {
        self.backlog.push_front(id);
    }

    /// Drop every backlog entry, returning them (used for cancellation and
    /// for migrating items off a dead queue).
    pub fn drain_backlog(&mut self) -> Vec<ItemId> {
        self.backlog.drain(..).collect()
    }

    pub fn remove(&mut self, id: ItemId) -> bool {
        if let Some(pos) = self.backlog.iter().position(|&q| q == id) {
            self.backlog.remove(pos);
            true
        } else {
            false
        }
    }
}
