//! CrashStateStore port - クラッシュ時の作業状態の退避先

use async_trait::async_trait;

use crate::domain::{CadenceError, PreservedState};

/// Single-slot store: a new save replaces whatever was there.
#[async_trait]
pub trait CrashStateStore: Send + Sync {
    async fn save(&self, state: PreservedState) -> Result<(), CadenceError>;

    /// Remove and return the preserved state, if any.
    async fn take(&self) -> Result<Option<PreservedState>, CadenceError>;
}
