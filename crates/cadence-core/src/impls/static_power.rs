//! StaticPowerSource - メモリ上に保持する電力シグナル

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::domain::{CadenceError, PowerSnapshot};
use crate::ports::PowerSignalSource;

const DEFAULT_PACING_DELAY: Duration = Duration::from_secs(30);

/// Push-style source: whoever observes the platform calls [`StaticPowerSource::set`].
pub struct StaticPowerSource {
    snapshot: RwLock<PowerSnapshot>,
    pacing_delay: Duration,
}

impl StaticPowerSource {
    pub fn new(snapshot: PowerSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            pacing_delay: DEFAULT_PACING_DELAY,
        }
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    pub fn set(&self, snapshot: PowerSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl Default for StaticPowerSource {
    fn default() -> Self {
        Self::new(PowerSnapshot::unrestricted())
    }
}

impl PowerSignalSource for StaticPowerSource {
    fn current_snapshot(&self) -> Result<PowerSnapshot, CadenceError> {
        Ok(*self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn recommended_pacing_delay(&self) -> Duration {
        self.pacing_delay
    }
}
