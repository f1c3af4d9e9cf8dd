//! In-memory implementation of the SessionStore trait.
//!
//! This is primarily for testing. It has the same semantics as the durable
//! backends but keeps the session in memory with no persistence.

use std::sync::RwLock;

use async_trait::async_trait;
use tether_core::Session;

use crate::error::Result;
use crate::traits::{check_cursor, SessionStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    session: Option<Session>,
    saves: u64,
    clears: u64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `session`.
    pub fn with_session(session: Session) -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                session: Some(session),
                ..MemoryStoreInner::default()
            }),
        }
    }

    /// Snapshot of the stored session.
    pub fn current(&self) -> Option<Session> {
        self.read().session.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.read().saves
    }

    /// Number of clears, including clears of an empty store.
    pub fn clear_count(&self) -> u64 {
        self.read().clears
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<Option<Session>> {
        Ok(self.read().session.clone())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut inner = self.write();
        check_cursor(inner.session.as_ref(), session)?;
        inner.session = Some(session.clone());
        inner.saves += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.write();
        inner.session = None;
        inner.clears += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tether_core::{AccountId, IdentityKey};

    fn session() -> Session {
        Session::with_identity(IdentityKey::from_seed(&[3u8; 32]), 99)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());

        let mut s = session();
        s.register(AccountId::new("27683913716@s.whatsapp.net"));
        store.save(&s).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(s));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_twice() {
        let store = MemoryStore::with_session(session());
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.clear_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_cursor_rejected() {
        let mut newer = session();
        newer.cursor = newer.cursor.next().next();
        let store = MemoryStore::with_session(newer.clone());

        let result = store.save(&session()).await;
        assert!(matches!(result, Err(StoreError::StaleCursor { .. })));
        assert_eq!(store.current(), Some(newer));
    }
}
