//! ServiceBinder port - 依存サービスへの (再) バインド

use async_trait::async_trait;

use crate::domain::CadenceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Success,
    AlreadyBound,
    Failed,
    Error(CadenceError),
}

impl BindOutcome {
    /// `Success` and `AlreadyBound` both mean the service is reachable.
    pub fn is_bound(&self) -> bool {
        matches!(self, BindOutcome::Success | BindOutcome::AlreadyBound)
    }
}

#[async_trait]
pub trait ServiceBinder: Send + Sync {
    /// One bind attempt. Retries are the caller's business.
    async fn bind(&self) -> BindOutcome;

    /// Drop the current binding before a forced restart.
    async fn unbind(&self) -> Result<(), CadenceError> {
        Ok(())
    }
}
