//! In-memory priority queue of pending tasks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::debug;

use super::record::{QueueKey, QueuedTask, TaskView};
use crate::domain::{PowerSnapshot, Priority, Task};
use crate::ports::Clock;

struct QueueState {
    /// Sorted by `QueueKey`, so the first entry is the natural head.
    entries: BTreeMap<QueueKey, QueuedTask>,

    /// Next enqueue sequence number.
    next_seq: u64,
}

impl QueueState {
    /// The entry collection should look at next.
    ///
    /// Expired tasks come first (in priority/FIFO order among themselves),
    /// which is how an old low-priority task can overtake a fresh
    /// high-priority one still inside its ready delay. Otherwise it is
    /// simply the first entry.
    fn effective_head(&self, now: Instant) -> Option<&QueuedTask> {
        self.entries
            .values()
            .find(|entry| entry.task.is_expired(entry.age(now)))
            .or_else(|| self.entries.values().next())
    }

    fn ready_head(&self, snapshot: &PowerSnapshot, now: Instant) -> Option<TaskView> {
        let head = self.effective_head(now)?;
        let age = head.age(now);
        if !head.task.is_collectible(age, snapshot) {
            return None;
        }
        let ready_normally =
            age >= head.task.ready_delay() && head.task.power_requirement().is_met_by(snapshot);
        Some(TaskView {
            key: head.key,
            id: head.task.id().clone(),
            age,
            forced: !ready_normally,
        })
    }
}

/// Thread-safe priority queue.
///
/// Ordering: priority ascending, then submit time ascending. Any number of
/// callers may `enqueue` concurrently; one consumer drains it. The lock is
/// never held across an `.await`.
pub struct TaskQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState {
                entries: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    // Entries are plain data and every mutation finishes before unlocking,
    // so a poisoned lock still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task, stamping its submit time. Identical ids are kept as distinct entries.
    pub fn enqueue(&self, task: Task) {
        let mut state = self.lock();
        let key = QueueKey {
            priority: task.priority(),
            submit_time: self.clock.now(),
            seq: state.next_seq,
        };
        state.next_seq += 1;
        debug!(task_id = %task.id(), priority = ?key.priority, "task enqueued");
        state.entries.insert(
            key,
            QueuedTask {
                key,
                task,
                forced: false,
            },
        );
    }

    /// Describe the head task if it is collectible under `snapshot` at `now`.
    ///
    /// Returns `None` when the queue is empty *or* the head is blocked; the
    /// caller must not look past a blocked head.
    pub fn peek_ready(&self, snapshot: &PowerSnapshot, now: Instant) -> Option<TaskView> {
        self.lock().ready_head(snapshot, now)
    }

    /// Remove a specific entry.
    pub fn remove(&self, key: &QueueKey) -> Option<QueuedTask> {
        self.lock().entries.remove(key)
    }

    /// `peek_ready` + `remove` under one lock.
    pub fn take_ready(&self, snapshot: &PowerSnapshot, now: Instant) -> Option<QueuedTask> {
        let mut state = self.lock();
        let view = state.ready_head(snapshot, now)?;
        let mut entry = state.entries.remove(&view.key)?;
        entry.forced = view.forced;
        Some(entry)
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn size_by_priority(&self, priority: Priority) -> usize {
        self.lock()
            .entries
            .keys()
            .filter(|key| key.priority == priority)
            .count()
    }

    /// Drop every pending task. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        dropped
    }
}
