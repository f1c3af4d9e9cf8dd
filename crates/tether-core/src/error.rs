//! Error types for Tether Core.

use thiserror::Error;

/// Errors raised by pure core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration value rejected; never retried.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid identity key: {0}")]
    InvalidIdentityKey(String),

    #[error("invalid pairing code: {0}")]
    InvalidPairingCode(String),
}

impl CoreError {
    /// The lifecycle failure class this error belongs to.
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::ConfigInvalid(_) => FailureKind::ConfigInvalid,
            CoreError::InvalidIdentityKey(_) => FailureKind::AuthInvalid,
            CoreError::InvalidPairingCode(_) => FailureKind::TransientNetwork,
        }
    }
}

/// Failure taxonomy used across the lifecycle.
///
/// Each class maps to exactly one recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retry with backoff; the session stays intact.
    TransientNetwork,
    /// The session must be cleared and paired again.
    AuthInvalid,
    /// Terminal; no automatic recovery.
    LoggedOut,
    /// Fails fast; no retry.
    ConfigInvalid,
    /// Escalation from transient/auth failures: forced clear plus cooldown.
    RetryLimitExceeded,
}

impl FailureKind {
    /// Whether recovery from this failure requires fresh credentials.
    pub fn requires_fresh_session(&self) -> bool {
        matches!(self, FailureKind::AuthInvalid | FailureKind::RetryLimitExceeded)
    }

    /// Whether the controller may try again on its own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::LoggedOut | FailureKind::ConfigInvalid)
    }
}
