//! Recovery - パーミッション、復旧結果、サービス稼働状態、退避した作業

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named runtime permission the dependent service needs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn record_audio() -> Self {
        Self::new("record_audio")
    }

    pub fn overlay() -> Self {
        Self::new("overlay")
    }

    pub fn notifications() -> Self {
        Self::new("notifications")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type PermissionSet = BTreeSet<Permission>;

/// Result of [`attempt_recovery`](crate::app::RecoveryCoordinator::attempt_recovery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult {
    Success,
    /// Another attempt was already running; nothing was done.
    AlreadyRecovering,
    ServiceBindingFailed(String),
    MaxRetriesExceeded { attempts: u32 },
    PermissionsDenied(PermissionSet),
    PermissionRationaleNeeded(PermissionSet),
    UnexpectedError(String),
}

impl RecoveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryResult::Success)
    }
}

/// Health of the dependent service, published on every relevant transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,

    /// Start of the current healthy stretch.
    pub up_since: Option<DateTime<Utc>>,

    pub last_restart: Option<DateTime<Utc>>,
    pub restarts: u32,
}

impl ServiceHealth {
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        match (self.healthy, self.up_since) {
            (true, Some(since)) => (now - since).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn mark_up(&mut self, now: DateTime<Utc>) {
        if !self.healthy || self.up_since.is_none() {
            self.up_since = Some(now);
        }
        self.healthy = true;
        self.consecutive_failures = 0;
        self.last_restart = Some(now);
        self.restarts += 1;
    }

    pub(crate) fn mark_down(&mut self) {
        self.healthy = false;
        self.up_since = None;
        self.consecutive_failures += 1;
    }
}

/// In-flight work captured when the service crashes, e.g. an active recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSnapshot {
    /// What was running ("recording", "upload", ...).
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

impl WorkSnapshot {
    pub fn new(operation: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            started_at,
        }
    }
}

/// What gets persisted by a crash with `preserve_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservedState {
    pub work: WorkSnapshot,
    pub crashed_at: DateTime<Utc>,
}
