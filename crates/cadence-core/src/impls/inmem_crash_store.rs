//! InMemoryCrashStateStore - プロセス内メモリのクラッシュ状態 (1 スロット)

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CadenceError, PreservedState};
use crate::ports::CrashStateStore;

#[derive(Default)]
pub struct InMemoryCrashStateStore {
    slot: Mutex<Option<PreservedState>>,
}

impl InMemoryCrashStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peek without consuming (for diagnostics and tests).
    pub async fn peek(&self) -> Option<PreservedState> {
        self.slot.lock().await.clone()
    }
}

#[async_trait]
impl CrashStateStore for InMemoryCrashStateStore {
    async fn save(&self, state: PreservedState) -> Result<(), CadenceError> {
        *self.slot.lock().await = Some(state);
        Ok(())
    }

    async fn take(&self) -> Result<Option<PreservedState>, CadenceError> {
        Ok(self.slot.lock().await.take())
    }
}
