//! Strong type definitions for Tether.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// An account address on the messaging network (e.g. `27683913716@s.whatsapp.net`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The user part before any `@` or `:` device suffix.
    pub fn user(&self) -> &str {
        let end = self
            .0
            .find(|c| c == '@' || c == ':')
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pairing code returned by the transport.
///
/// Codes are eight alphanumeric characters; they display as `ABCD-EFGH`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairingCode(String);

impl PairingCode {
    pub const LEN: usize = 8;

    /// Parse a code, ignoring dashes and case.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let code: String = raw
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if code.len() != Self::LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidPairingCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingCode({})", self)
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, tail) = self.0.split_at(Self::LEN / 2);
        write!(f, "{}-{}", head, tail)
    }
}
