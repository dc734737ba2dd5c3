//! PowerSignalSource port - 端末の電力状態の取得

use std::time::Duration;

use crate::domain::{CadenceError, PowerSnapshot};

/// Latest-known power state.
///
/// Polled once per scheduler cycle, so both calls must be cheap and
/// non-blocking. Push-based sources simply return their last pushed value.
pub trait PowerSignalSource: Send + Sync {
    fn current_snapshot(&self) -> Result<PowerSnapshot, CadenceError>;

    /// How long the scheduler idles when pressure is critical and nothing is queued.
    fn recommended_pacing_delay(&self) -> Duration;
}
