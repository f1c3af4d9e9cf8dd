//! SQLite implementation of the SessionStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. The session lives in a single row that is
//! replaced inside a transaction, so a concurrent `load` never observes a
//! half-written session.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use tether_core::Session;

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{check_cursor, SessionStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of recorded clears.
    pub async fn clear_count(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM session_clears", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

fn encode(session: &Session) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(session, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode(body: &[u8]) -> Result<Session> {
    ciborium::from_reader(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn select_session(conn: &Connection) -> Result<Option<Session>> {
    let body: Option<Vec<u8>> = conn
        .query_row("SELECT body FROM session WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    body.map(|b| decode(&b)).transpose()
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self) -> Result<Option<Session>> {
        self.blocking(|conn| select_session(conn)).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        let body = encode(&session)?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let persisted = match select_session(&tx) {
                Ok(persisted) => persisted,
                Err(StoreError::Serialization(e)) => {
                    warn!(error = %e, "overwriting undecodable session row");
                    None
                }
                Err(e) => return Err(e),
            };
            check_cursor(persisted.as_ref(), &session)?;

            tx.execute(
                "INSERT OR REPLACE INTO session (id, fingerprint, cursor, registered, body, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)",
                params![
                    session.fingerprint(),
                    session.cursor.0 as i64,
                    session.is_registered() as i64,
                    body,
                    now_millis(),
                ],
            )?;

            tx.commit()?;
            debug!(fingerprint = %session.fingerprint(), cursor = %session.cursor, "session saved");
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.blocking(|conn| {
            let tx = conn.transaction()?;

            let fingerprint: Option<String> = tx
                .query_row("SELECT fingerprint FROM session WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;

            tx.execute("DELETE FROM session", [])?;
            tx.execute(
                "INSERT INTO session_clears (fingerprint, cleared_at) VALUES (?1, ?2)",
                params![fingerprint, now_millis()],
            )?;

            tx.commit()?;
            debug!(fingerprint = ?fingerprint, "session cleared");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{AccountId, IdentityKey};

    fn make_session(seed: u8) -> Session {
        Session::with_identity(IdentityKey::from_seed(&[seed; 32]), 1234)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.load().await.unwrap().is_none());

        let mut session = make_session(1);
        session.register(AccountId::new("27683913716@s.whatsapp.net"));
        store.save(&session).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(loaded.is_registered());
    }

    #[tokio::test]
    async fn test_save_replaces_single_row() {
        let store = SqliteStore::open_memory().unwrap();
        let mut session = make_session(1);
        store.save(&session).await.unwrap();

        session.cursor = session.cursor.next();
        store.save(&session).await.unwrap();

        let other = make_session(2);
        store.save(&other).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn test_stale_cursor_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        let old = make_session(1);
        let mut newer = old.clone();
        newer.cursor = old.cursor.next();

        store.save(&newer).await.unwrap();
        let result = store.save(&old).await;
        assert!(matches!(result, Err(StoreError::StaleCursor { .. })));
        assert_eq!(store.load().await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_clear_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        store.save(&make_session(1)).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        assert_eq!(store.clear_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        let session = make_session(5);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&session).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));
    }
}
