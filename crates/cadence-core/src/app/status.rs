//! Status - スケジューラのサイクル統計

use serde::{Deserialize, Serialize};

use crate::domain::{OutcomeKind, PressureLevel, TaskReport};

/// Snapshot of scheduler activity, replayed to late subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cycles: u64,
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,

    /// Tasks collected through the max-age override.
    pub forced: u64,

    pub last_pressure: Option<PressureLevel>,
}

impl SchedulerStatus {
    pub(crate) fn record(&mut self, report: &TaskReport) {
        self.executed += 1;
        if report.forced {
            self.forced += 1;
        }
        match report.outcome.kind() {
            OutcomeKind::Success => {}
            OutcomeKind::Failure => self.failed += 1,
            OutcomeKind::Panic => self.panicked += 1,
        }
    }

    pub fn succeeded(&self) -> u64 {
        self.executed - self.failed - self.panicked
    }
}
