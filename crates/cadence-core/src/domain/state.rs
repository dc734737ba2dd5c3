//! State - リカバリの状態機械

use serde::{Deserialize, Serialize};

/// Where the recovery coordinator is.
///
/// # Transitions
/// - Idle -> Attempting -> Recovered | Failed
/// - Idle -> Attempting -> Failed (permissions denied)
/// - any -> PermissionDenied -> RequiresManualIntervention (critical permission)
/// - any -> Crashed -> CrashLoopDetected -> Attempting
/// - any -> RestartingService -> Attempting
/// - any -> Idle (reset)
///
/// Nothing is terminal for good: every state is left again on the next
/// external trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Idle,
    Attempting,
    RestartingService,
    Crashed,
    CrashLoopDetected,
    PermissionDenied,
    Recovered,
    Failed,
    RequiresManualIntervention,
}

impl RecoveryState {
    /// Ends the current cycle; the next transition needs an external trigger.
    pub fn is_cycle_terminal(self) -> bool {
        matches!(
            self,
            RecoveryState::Recovered
                | RecoveryState::Failed
                | RecoveryState::RequiresManualIntervention
        )
    }

    /// States a presentation layer is expected to surface to the user.
    pub fn is_user_visible_failure(self) -> bool {
        matches!(
            self,
            RecoveryState::Failed
                | RecoveryState::PermissionDenied
                | RecoveryState::RequiresManualIntervention
        )
    }
}
