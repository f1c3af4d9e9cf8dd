//! Disconnect classification.
//!
//! The transport reports a status code and free text when a connection
//! closes. Matching on text is fragile, so the rules live behind
//! [`DisconnectClassifier`] and can be swapped without touching the state
//! machine.

use std::fmt;

use crate::error::FailureKind;

/// The transport's canonical "logged out" status code.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// What the transport said when the connection went away.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisconnectReport {
    /// Status code, if the transport supplied one.
    pub status_code: Option<u16>,
    /// Free-text reason.
    pub reason: String,
}

impl DisconnectReport {
    pub fn new(status_code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            reason: reason.into(),
        }
    }
}

/// Classified cause of a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCause {
    /// Credentials were revoked; terminal.
    LoggedOut,
    /// Credentials rejected.
    AuthFailure,
    /// Explicit connection failure or exhausted pairing references.
    ConnectionFailure,
    /// Reset, timeout and friends.
    NetworkError,
    /// Anything else; a generic drop.
    Unknown,
}

impl DisconnectCause {
    /// Failure class of this cause.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DisconnectCause::LoggedOut => FailureKind::LoggedOut,
            DisconnectCause::AuthFailure | DisconnectCause::ConnectionFailure => {
                FailureKind::AuthInvalid
            }
            DisconnectCause::NetworkError | DisconnectCause::Unknown => {
                FailureKind::TransientNetwork
            }
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectCause::LoggedOut => "logged_out",
            DisconnectCause::AuthFailure => "auth_failure",
            DisconnectCause::ConnectionFailure => "connection_failure",
            DisconnectCause::NetworkError => "network_error",
            DisconnectCause::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Maps a disconnect report to a cause.
pub trait DisconnectClassifier: Send + Sync {
    fn classify(&self, report: &DisconnectReport) -> DisconnectCause;
}

/// Prioritized marker rules.
///
/// Evaluation order: logged-out status code, connection-failure markers,
/// auth markers, network markers, then [`DisconnectCause::Unknown`]. Markers
/// match case-insensitively as substrings of the reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRules {
    pub logged_out_status: u16,
    pub connection_failure: Vec<String>,
    pub auth_failure: Vec<String>,
    pub network_error: Vec<String>,
}

impl Default for MarkerRules {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            logged_out_status: LOGGED_OUT_STATUS,
            connection_failure: owned(&["connection failure", "qr refs attempts ended"]),
            auth_failure: owned(&["401", "403", "unauthorized", "forbidden"]),
            network_error: owned(&["econnreset", "connection reset", "etimedout", "timed out"]),
        }
    }
}

impl MarkerRules {
    fn matches(markers: &[String], reason: &str) -> bool {
        markers
            .iter()
            .any(|marker| reason.contains(&marker.to_ascii_lowercase()))
    }
}

impl DisconnectClassifier for MarkerRules {
    fn classify(&self, report: &DisconnectReport) -> DisconnectCause {
        if report.status_code == Some(self.logged_out_status) {
            return DisconnectCause::LoggedOut;
        }

        let reason = report.reason.to_ascii_lowercase();
        if Self::matches(&self.connection_failure, &reason) {
            DisconnectCause::ConnectionFailure
        } else if Self::matches(&self.auth_failure, &reason) {
            DisconnectCause::AuthFailure
        } else if Self::matches(&self.network_error, &reason) {
            DisconnectCause::NetworkError
        } else {
            DisconnectCause::Unknown
        }
    }
}
