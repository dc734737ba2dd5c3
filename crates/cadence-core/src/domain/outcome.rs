//! Outcome model: what happened to one task execution.
//!
//! Task failures never escape the task boundary. Instead each execution
//! produces a [`TaskReport`] whose [`TaskOutcome`] says which way it went,
//! so callers (and tests) can match on failure categories.

use serde::{Deserialize, Serialize};

use super::errors::CadenceError;
use super::ids::TaskId;
use super::task::Priority;

/// Classification of a task execution, serialized as SUCCESS / FAILURE / PANIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// The action returned an error.
    Failed(CadenceError),
    /// The action panicked; the payload message if it was a string.
    Panicked(String),
}

impl TaskOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TaskOutcome::Succeeded => OutcomeKind::Success,
            TaskOutcome::Failed(_) => OutcomeKind::Failure,
            TaskOutcome::Panicked(_) => OutcomeKind::Panic,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

impl From<Result<(), CadenceError>> for TaskOutcome {
    fn from(result: Result<(), CadenceError>) -> Self {
        match result {
            Ok(()) => TaskOutcome::Succeeded,
            Err(err) => TaskOutcome::Failed(err),
        }
    }
}

/// Report published after each task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: TaskId,
    pub priority: Priority,

    /// Collected through the max-age override rather than normal readiness.
    pub forced: bool,

    pub outcome: TaskOutcome,
}

/// Best-effort text for a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
