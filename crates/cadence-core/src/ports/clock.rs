//! Clock port - 時刻の抽象化
//!
//! Monotonic time is `tokio::time::Instant` so paused-time tests
//! (`#[tokio::test(start_paused = true)]`) see the same clock as the sleeps.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Clock provides the current time.
///
/// # Testability
/// - swapped via trait object
/// - tests use `impls::ManualClock` or paused tokio time
pub trait Clock: Send + Sync {
    /// Monotonic now, used for every duration computation.
    fn now(&self) -> Instant;

    /// Wall-clock now, used only for reporting.
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
