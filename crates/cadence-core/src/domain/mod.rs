//! Domain - ドメインモデル (ids, task, power, outcome, recovery state, errors)
//!
//! Plain value types only: nothing here sleeps, locks or talks to a collaborator.

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod power;
pub mod recovery;
pub mod state;
pub mod task;

pub use self::errors::{CadenceError, ErrorKind};
pub use self::ids::TaskId;
pub use self::outcome::{OutcomeKind, TaskOutcome, TaskReport};
pub use self::power::{PowerRequirement, PowerSnapshot, PressureLevel};
pub use self::recovery::{
    Permission, PermissionSet, PreservedState, RecoveryResult, ServiceHealth, WorkSnapshot,
};
pub use self::state::RecoveryState;
pub use self::task::{DEFAULT_MAX_AGE, Priority, Task, TaskAction, TaskBuilder};
