//! Error types for Tether.

use tether_core::{CoreError, FailureKind};
use tether_store::StoreError;
use tether_transport::TransportError;
use thiserror::Error;

/// Errors that can occur while running the lifecycle.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration or validation error.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session could not be cleared, even after a retry.
    #[error("failed to clear session: {0}")]
    SessionClear(#[source] StoreError),

    /// An external call did not complete in time.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// A pairing request is already outstanding.
    #[error("pairing already in progress")]
    PairingInProgress,
}

impl TetherError {
    /// Whether the supervisor must stop instead of restarting.
    pub fn is_fatal(&self) -> bool {
        match self {
            TetherError::SessionClear(_) => true,
            TetherError::Config(e) => e.kind() == FailureKind::ConfigInvalid,
            _ => false,
        }
    }
}

/// Result type for Tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;
