//! cadence-core
//!
//! Power-aware background task scheduling and service recovery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, power, outcome, recovery state, errors）
//! - **ports**: 抽象化レイヤー（Clock, PowerSignalSource, PermissionCollaborator, ServiceBinder, CrashStateStore）
//! - **queue**: priority/FIFO task queue with readiness gating
//! - **retry**: RetryPolicy + RetryExecutor
//! - **app**: アプリケーションロジック（AdaptiveScheduler, RecoveryCoordinator, WatchdogLoop）
//! - **impls**: 実装（テスト・シミュレーション用の in-memory ports）
//! - **config**: serde で読める設定値

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod retry;

pub use app::{AdaptiveScheduler, CrashReport, RecoveryCoordinator, SchedulerStatus, WatchdogLoop};
pub use config::{RecoveryConfig, SchedulerConfig, WatchdogConfig};
pub use domain::{
    CadenceError, PowerRequirement, PowerSnapshot, PressureLevel, Priority, RecoveryResult,
    RecoveryState, Task, TaskId, TaskOutcome, TaskReport,
};
pub use retry::{RetryExecutor, RetryPolicy, with_retry};
