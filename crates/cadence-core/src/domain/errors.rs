//! Errors - エラー型と分類

use thiserror::Error;

/// Operational classification of a failure.
///
/// - Transient: worth retrying (network, rate limit, 5xx, audio device hiccup)
/// - Permanent: retrying cannot help (credentials, authorization)
/// - Infrastructure: local plumbing failed (power signal, collaborator wiring)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Core error type shared by the scheduler, retry executor and recovery coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CadenceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("rate limited by remote api")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("server error (status={status}): {message}")]
    Server { status: u16, message: String },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("power signal unavailable: {0}")]
    PowerSignal(String),

    #[error("collaborator failed: {0}")]
    Collaborator(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Other(String),
}

impl CadenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CadenceError::Network(_)
            | CadenceError::Timeout(_)
            | CadenceError::RateLimited { .. }
            | CadenceError::AudioDevice(_) => ErrorKind::Transient,
            // only 5xx is temporary; a 4xx will fail the same way next time
            CadenceError::Server { status, .. } if (500..600).contains(status) => {
                ErrorKind::Transient
            }
            CadenceError::Server { .. }
            | CadenceError::Authentication(_)
            | CadenceError::Authorization(_)
            | CadenceError::InvalidCredentials
            | CadenceError::Task(_)
            | CadenceError::Other(_) => ErrorKind::Permanent,
            CadenceError::PowerSignal(_) | CadenceError::Collaborator(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Default retry predicate.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Credential problems. Neither the default nor the bind policy retries them.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CadenceError::Authentication(_)
                | CadenceError::Authorization(_)
                | CadenceError::InvalidCredentials
        )
    }
}
