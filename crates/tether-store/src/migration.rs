//! Schema migrations for [`SqliteStore`](crate::SqliteStore).
//!
//! Steps are applied in order inside one transaction. The applied version is
//! kept in SQLite's `user_version` pragma.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Ordered schema steps; step `i` brings the schema to version `i + 1`.
const STEPS: &[&str] = &[
    // v1: at most one row, the active session of this process
    r#"
    CREATE TABLE session (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        fingerprint TEXT NOT NULL,
        cursor INTEGER NOT NULL,
        registered INTEGER NOT NULL,
        body BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );
    "#,
    // v2: audit trail of session clears; fingerprint is NULL for an empty store
    r#"
    CREATE TABLE session_clears (
        fingerprint TEXT,
        cleared_at INTEGER NOT NULL
    );
    CREATE INDEX idx_session_clears_at ON session_clears(cleared_at);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {} is newer than this build ({})",
            found, CURRENT_VERSION
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, step) in STEPS.iter().enumerate().skip(found as usize) {
        tx.execute_batch(step).map_err(|e| {
            StoreError::Migration(format!("step to version {} failed: {}", index + 1, e))
        })?;
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Wall-clock milliseconds since the epoch, 0 if the clock is before it.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
