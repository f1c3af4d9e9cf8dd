//! Session: the credential bundle that authorizes a connection.
//!
//! The transport owns the meaning of the credentials; Tether only needs to
//! create a fresh identity, persist whatever the transport hands back, and
//! know whether the session has completed registration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::IdentityKey;
use crate::types::AccountId;

/// Monotonic sync position supplied by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SyncCursor(pub u64);

impl SyncCursor {
    pub const ZERO: Self = Self(0);

    /// The next cursor position.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity and registration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Long-term identity key.
    pub identity: IdentityKey,
    /// Random registration id chosen at creation.
    pub registration_id: u16,
    /// Whether pairing completed for this identity.
    pub registered: bool,
    /// The account this session belongs to, known after pairing.
    pub account: Option<AccountId>,
}

/// Credentials plus the sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub credentials: Credentials,
    pub cursor: SyncCursor,
}

impl Session {
    /// Create an unregistered session with a new random identity.
    pub fn fresh() -> Self {
        let registration_id = rand::thread_rng().gen_range(1..=16380);
        Self::with_identity(IdentityKey::generate(), registration_id)
    }

    /// Create an unregistered session from existing key material.
    pub fn with_identity(identity: IdentityKey, registration_id: u16) -> Self {
        Self {
            credentials: Credentials {
                identity,
                registration_id,
                registered: false,
                account: None,
            },
            cursor: SyncCursor::ZERO,
        }
    }

    /// Whether the session can authenticate without pairing.
    pub fn is_registered(&self) -> bool {
        self.credentials.registered
    }

    /// Mark the session as paired to `account`.
    pub fn register(&mut self, account: AccountId) {
        self.credentials.registered = true;
        self.credentials.account = Some(account);
    }

    /// Log-safe identifier of this session.
    pub fn fingerprint(&self) -> String {
        self.credentials.identity.public_key().fingerprint()
    }

    /// Whether `other` is a newer or equal copy of the same identity.
    pub fn is_superseded_by(&self, other: &Session) -> bool {
        self.credentials.identity == other.credentials.identity && other.cursor >= self.cursor
    }
}
