//! PermissionCollaborator port - 実行時パーミッション要求

use async_trait::async_trait;

use crate::domain::{CadenceError, PermissionSet};

/// Answer to one permission request cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied(PermissionSet),
    /// The platform wants an explanation shown before asking again.
    NeedsRationale(PermissionSet),
}

#[async_trait]
pub trait PermissionCollaborator: Send + Sync {
    /// Request every permission the service needs. Called once per recovery attempt.
    async fn request_all(&self) -> Result<PermissionOutcome, CadenceError>;
}
