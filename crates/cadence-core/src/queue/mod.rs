//! Queue module: pending tasks ordered by priority, then submit time.

mod record;
mod task_queue;

pub use record::{QueueKey, QueuedTask, TaskView};
pub use task_queue::TaskQueue;
