//! Queue record: a task plus the metadata the queue stamps on it.

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Priority, Task, TaskId};

/// Position of a task in the queue.
///
/// Field order is the ordering: priority first, then submit time, then the
/// enqueue sequence number so equal timestamps still keep FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub priority: Priority,
    pub submit_time: Instant,
    pub seq: u64,
}

/// A task the queue owns.
#[derive(Debug)]
pub struct QueuedTask {
    pub(super) key: QueueKey,
    pub(super) task: Task,

    /// Set when the task was collected through the max-age override.
    pub(super) forced: bool,
}

impl QueuedTask {
    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn id(&self) -> &TaskId {
        self.task.id()
    }

    pub fn priority(&self) -> Priority {
        self.key.priority
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.key.submit_time)
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn is_batchable(&self) -> bool {
        self.task.is_batchable()
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Read-only description of the collectible head, returned by `peek_ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskView {
    pub key: QueueKey,
    pub id: TaskId,
    pub age: Duration,

    /// Collectible only because it is past its max age.
    pub forced: bool,
}
