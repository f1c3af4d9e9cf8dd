//! # Tether Core
//!
//! Pure primitives for Tether: the connection lifecycle state machine,
//! backoff, disconnect classification, phone normalization and sessions.
//!
//! This crate contains no I/O, no storage, no networking. Every decision the
//! connection controller makes is computed here and can be tested without a
//! live transport.
//!
//! ## Key Types
//!
//! - [`Lifecycle`] - The connection state machine (`step(event) -> Transition`)
//! - [`BackoffPolicy`] - `min(base + attempt * step, cap)`
//! - [`DisconnectClassifier`] - Maps a [`DisconnectReport`] to a [`DisconnectCause`]
//! - [`Session`] - Credential bundle plus sync cursor
//! - [`PhoneNumber`] - A number normalized to international format
//! - [`PendingTable`] - Owned table of pending operations with expiry
//!
//! ## State Machine
//!
//! ```text
//!   Idle ──start──► Connecting ──handshake──► Open
//!                    │      ▲                   │
//!        pairing req │      │ reconnect due     │ closed
//!                    ▼      │                   ▼
//!            AwaitingPairing └──── ClosedRetryable
//!                                     ClosedTerminal (logged out)
//! ```

pub mod backoff;
pub mod crypto;
pub mod disconnect;
pub mod error;
pub mod lifecycle;
pub mod pending;
pub mod phone;
pub mod session;
pub mod types;

pub use backoff::{delay, BackoffPolicy};
pub use crypto::{Blake3Hash, IdentityKey, IdentityPublicKey};
pub use disconnect::{
    DisconnectCause, DisconnectClassifier, DisconnectReport, MarkerRules, LOGGED_OUT_STATUS,
};
pub use error::{CoreError, FailureKind};
pub use lifecycle::{
    ConnectionState, Effect, Lifecycle, LifecycleEvent, LifecyclePolicy, RetryCounters,
    Transition,
};
pub use pending::PendingTable;
pub use phone::{PhoneNumber, PhoneRules};
pub use session::{Credentials, Session, SyncCursor};
pub use types::{AccountId, PairingCode};
