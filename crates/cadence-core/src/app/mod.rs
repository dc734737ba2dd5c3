//! App - アプリケーション層 (ports を組み合わせた常駐コンポーネント)
//!
//! # 主要コンポーネント
//! - **AdaptiveScheduler**: power-aware batching loop over the task queue
//! - **RecoveryCoordinator**: permissions, binding, crash-loop throttling
//! - **WatchdogLoop**: periodic recovery retry after a failure
//! - **SchedulerStatus**: counters published by the scheduler

pub mod recovery;
pub mod scheduler;
pub mod status;
pub mod watchdog_loop;

pub use self::recovery::{CrashReport, RecoveryCoordinator};
pub use self::scheduler::AdaptiveScheduler;
pub use self::status::SchedulerStatus;
pub use self::watchdog_loop::WatchdogLoop;
