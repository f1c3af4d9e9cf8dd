//! SessionStore trait: the abstract interface for session persistence.
//!
//! The controller is storage-agnostic. Implementations include a session
//! directory (default), SQLite, and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::Session;

use crate::error::{Result, StoreError};

/// Async interface for persisting the one session of this process.
///
/// # Design Notes
///
/// - `load` returning `None` means no session exists; the controller then
///   starts a fresh one and pairs.
/// - `save` is durable before it returns. A save whose cursor is older than
///   the persisted cursor of the same identity fails with `StaleCursor`.
/// - `clear` is atomic with respect to a concurrent `load`, which sees
///   either the whole session or nothing. Clearing twice is not an error.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted session, if any.
    async fn load(&self) -> Result<Option<Session>>;

    /// Persist `session`, replacing the previous copy.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session.
    async fn clear(&self) -> Result<()>;
}

/// Reject `next` if it would move the cursor of `persisted` backwards.
///
/// Sessions of different identities never conflict; a new identity simply
/// replaces the old one.
pub fn check_cursor(persisted: Option<&Session>, next: &Session) -> Result<()> {
    match persisted {
        Some(current)
            if current.credentials.identity == next.credentials.identity
                && next.cursor < current.cursor =>
        {
            Err(StoreError::StaleCursor {
                persisted: current.cursor,
                attempted: next.cursor,
            })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn load(&self) -> Result<Option<Session>> {
        (**self).load().await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        (**self).save(session).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Box<S> {
    async fn load(&self) -> Result<Option<Session>> {
        (**self).load().await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        (**self).save(session).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}
