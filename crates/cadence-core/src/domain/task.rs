//! Task - 遅延実行する作業単位とスケジューリング制約

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use super::errors::CadenceError;
use super::ids::TaskId;
use super::power::{PowerRequirement, PowerSnapshot};

/// Hard deadline applied when the caller does not supply one.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Task priority. Lower ordinal is served first, so the derived `Ord`
/// matches queue order (`Critical < High < ... < Background`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];
}

/// The work itself. Invoked at most once, so it is `FnOnce`.
pub type TaskAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CadenceError>> + Send>;

/// A unit of deferred work.
///
/// The submit time is not part of the task: the queue stamps it at enqueue.
pub struct Task {
    id: TaskId,
    priority: Priority,
    ready_delay: Duration,
    max_age: Duration,
    batchable: bool,
    power_requirement: PowerRequirement,
    action: TaskAction,
}

impl Task {
    pub fn builder<F, Fut>(action: F) -> TaskBuilder
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CadenceError>> + Send + 'static,
    {
        TaskBuilder::new(action)
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ready_delay(&self) -> Duration {
        self.ready_delay
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn is_batchable(&self) -> bool {
        self.batchable
    }

    pub fn power_requirement(&self) -> PowerRequirement {
        self.power_requirement
    }

    /// Has the task outlived its hard deadline?
    pub fn is_expired(&self, age: Duration) -> bool {
        age >= self.max_age
    }

    /// Collection rule: `(age >= ready_delay && power ok) || age >= max_age`.
    ///
    /// The second clause ignores power entirely so no task waits forever.
    pub fn is_collectible(&self, age: Duration, snapshot: &PowerSnapshot) -> bool {
        let ready = age >= self.ready_delay && self.power_requirement.is_met_by(snapshot);
        ready || self.is_expired(age)
    }

    /// Consume the task and start its action.
    pub fn run(self) -> BoxFuture<'static, Result<(), CadenceError>> {
        (self.action)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("ready_delay", &self.ready_delay)
            .field("max_age", &self.max_age)
            .field("batchable", &self.batchable)
            .field("power_requirement", &self.power_requirement)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Task`].
///
/// Defaults: generated id, `Normal` priority, no ready delay,
/// [`DEFAULT_MAX_AGE`], batchable, `PowerRequirement::Any`.
pub struct TaskBuilder {
    id: Option<TaskId>,
    priority: Priority,
    ready_delay: Duration,
    max_age: Duration,
    batchable: bool,
    power_requirement: PowerRequirement,
    action: TaskAction,
}

impl TaskBuilder {
    fn new<F, Fut>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CadenceError>> + Send + 'static,
    {
        Self {
            id: None,
            priority: Priority::default(),
            ready_delay: Duration::ZERO,
            max_age: DEFAULT_MAX_AGE,
            batchable: true,
            power_requirement: PowerRequirement::default(),
            action: Box::new(move || action().boxed()),
        }
    }

    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn ready_delay(mut self, ready_delay: Duration) -> Self {
        self.ready_delay = ready_delay;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn batchable(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    pub fn power_requirement(mut self, requirement: PowerRequirement) -> Self {
        self.power_requirement = requirement;
        self
    }

    pub fn build(self) -> Task {
        Task {
            id: self.id.unwrap_or_else(TaskId::generate),
            priority: self.priority,
            ready_delay: self.ready_delay,
            max_age: self.max_age,
            batchable: self.batchable,
            power_requirement: self.power_requirement,
            action: self.action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskBuilder {
        Task::builder(|| async { Ok(()) })
    }

    #[test]
    fn priority_order_serves_critical_first() {
        let mut all = Priority::ALL.to_vec();
        all.reverse();
        all.sort();
        assert_eq!(all, Priority::ALL.to_vec());
        assert!(Priority::Critical < Priority::Background);
    }

    #[test]
    fn builder_defaults() {
        let task = noop().build();
        assert!(task.id().is_generated());
        assert_eq!(task.priority(), Priority::Normal);
        assert_eq!(task.ready_delay(), Duration::ZERO);
        assert_eq!(task.max_age(), DEFAULT_MAX_AGE);
        assert!(task.is_batchable());
        assert_eq!(task.power_requirement(), PowerRequirement::Any);
    }

    #[test]
    fn not_collectible_before_ready_delay() {
        let task = noop().ready_delay(Duration::from_secs(10)).build();
        let snap = PowerSnapshot::unrestricted();
        assert!(!task.is_collectible(Duration::from_secs(9), &snap));
        assert!(task.is_collectible(Duration::from_secs(10), &snap));
    }

    #[test]
    fn expired_task_ignores_power_requirement() {
        let task = noop()
            .power_requirement(PowerRequirement::RequireFullPower)
            .max_age(Duration::from_secs(60))
            .build();
        let saving = PowerSnapshot {
            power_save: true,
            ..PowerSnapshot::default()
        };
        assert!(!task.is_collectible(Duration::from_secs(59), &saving));
        assert!(task.is_collectible(Duration::from_secs(60), &saving));
    }

    #[tokio::test]
    async fn run_invokes_action() {
        let task = Task::builder(|| async { Err(CadenceError::Task("nope".into())) }).build();
        let err = task.run().await.unwrap_err();
        assert_eq!(err, CadenceError::Task("nope".into()));
    }
}
