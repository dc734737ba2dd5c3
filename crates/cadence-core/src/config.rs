//! Config - scheduler / recovery / watchdog の設定値
//!
//! Every struct is `#[serde(default)]`, so a config file only needs the keys
//! it changes. Durations are written as integer milliseconds (`*_ms`).

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Permission, PermissionSet};

/// `Duration` <-> integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between two cycles.
    #[serde(rename = "cycle_interval_ms", with = "millis")]
    pub cycle_interval: Duration,

    /// Pause after a cycle fails before the loop resumes.
    #[serde(rename = "error_backoff_ms", with = "millis")]
    pub error_backoff: Duration,

    /// Gap between tasks of a sequential (high pressure) batch.
    #[serde(rename = "sequential_gap_ms", with = "millis")]
    pub sequential_gap: Duration,

    /// Buffer of the task report broadcast channel.
    pub report_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            sequential_gap: Duration::from_millis(500),
            report_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Crashes closer together than this count towards a loop.
    #[serde(rename = "crash_window_ms", with = "millis")]
    pub crash_window: Duration,

    /// Crashes inside the window that make a loop.
    pub crash_threshold: u32,

    /// Pause imposed once a loop is detected; also the ceiling of the
    /// escalating per-crash delay.
    #[serde(rename = "crash_loop_cooloff_ms", with = "millis")]
    pub crash_loop_cooloff: Duration,

    /// Delay before recovering from a first crash; doubles per crash.
    #[serde(rename = "crash_base_delay_ms", with = "millis")]
    pub crash_base_delay: Duration,

    /// Preserved work is only handed back if recovery lands this soon after the crash.
    #[serde(rename = "restore_window_ms", with = "millis")]
    pub restore_window: Duration,

    /// Pause between unbind and rebind on a forced restart.
    #[serde(rename = "restart_settle_ms", with = "millis")]
    pub restart_settle: Duration,

    /// Denying any of these stops automatic recovery.
    pub critical_permissions: PermissionSet,
}

impl RecoveryConfig {
    /// Delay before the recovery attempt that follows crash number `crash_count`.
    ///
    /// 1st: base, 2nd: 2x base, 3rd: 4x base, 4th and later: the cool-off.
    pub fn crash_delay(&self, crash_count: u32) -> Duration {
        let escalated = match crash_count {
            0 | 1 => Some(self.crash_base_delay),
            2 => self.crash_base_delay.checked_mul(2),
            3 => self.crash_base_delay.checked_mul(4),
            _ => None,
        };
        escalated.map_or(self.crash_loop_cooloff, |delay| {
            delay.min(self.crash_loop_cooloff)
        })
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            crash_window: Duration::from_secs(60),
            crash_threshold: 3,
            crash_loop_cooloff: Duration::from_secs(5 * 60),
            crash_base_delay: Duration::from_secs(1),
            restore_window: Duration::from_secs(5 * 60),
            restart_settle: Duration::from_millis(500),
            critical_permissions: BTreeSet::from([Permission::record_audio(), Permission::overlay()]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}
