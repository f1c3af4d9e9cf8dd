//! Error types for the transport module.

use tether_core::DisconnectReport;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// No connection is open on this handle.
    #[error("not connected")]
    NotConnected,

    /// The remote rejected the request.
    #[error("rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// Timeout waiting for the remote.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transport-level network error.
    #[error("network error: {0}")]
    Network(String),

    /// The dispatcher failed to handle a message.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Describe this error as a disconnect, for classification.
    pub fn disconnect_report(&self) -> DisconnectReport {
        DisconnectReport::new(self.status_code(), self.to_string())
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
