//! Ports - 外部コラボレータとの境界 (trait 定義)
//!
//! Power state, permissions, service binding and crash-state persistence all
//! live outside the core. Each trait is the smallest surface the scheduler or
//! the recovery coordinator actually calls; `impls` has in-memory versions.

pub mod clock;
pub mod crash_store;
pub mod permission;
pub mod power_source;
pub mod service_bind;

pub use self::clock::{Clock, SystemClock};
pub use self::crash_store::CrashStateStore;
pub use self::permission::{PermissionCollaborator, PermissionOutcome};
pub use self::power_source::PowerSignalSource;
pub use self::service_bind::{BindOutcome, ServiceBinder};
