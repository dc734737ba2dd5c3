//! Task identifiers.
//!
//! Ids are caller-supplied labels for cancellation and diagnostics. They are
//! *not* required to be unique: two queued tasks may carry the same id.
//! When the caller does not supply one, a ULID-based id is generated so that
//! generated ids still sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const GENERATED_PREFIX: &str = "task-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `task-<ulid>` id.
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_generated(&self) -> bool {
        self.0
            .strip_prefix(GENERATED_PREFIX)
            .is_some_and(|rest| Ulid::from_string(rest).is_ok())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
