//! Directory-backed implementation of the SessionStore trait.
//!
//! The session lives in `<dir>/creds.json`. Saves write a temp file, fsync
//! it and rename it over the old copy. Clearing renames the whole directory
//! aside before deleting it, so a concurrent `load` sees either the complete
//! session or nothing.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_core::Session;

use crate::error::{Result, StoreError};
use crate::migration::now_millis;
use crate::traits::{check_cursor, SessionStore};

const CREDS_FILE: &str = "creds.json";
const TEMP_FILE: &str = "creds.json.tmp";

/// Session directory store.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes operations issued through this handle.
    op: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            op: Mutex::new(()),
        }
    }

    /// The session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }
}

fn read_session(path: &Path) -> Result<Option<Session>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_session(dir: &Path, session: &Session) -> Result<()> {
    fs::create_dir_all(dir)?;

    let persisted = match read_session(&dir.join(CREDS_FILE)) {
        Ok(persisted) => persisted,
        Err(StoreError::Serialization(e)) => {
            warn!(error = %e, "overwriting unreadable session file");
            None
        }
        Err(e) => return Err(e),
    };
    check_cursor(persisted.as_ref(), session)?;

    let temp = dir.join(TEMP_FILE);
    let mut file = File::create(&temp)?;
    file.write_all(&serde_json::to_vec_pretty(session)?)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, dir.join(CREDS_FILE))?;
    sync_dir(dir);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "failed to sync session directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn remove_session_dir(dir: &Path) -> Result<()> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".into());
    let aside = dir.with_file_name(format!(".{}.cleared-{}", name, now_millis()));

    match fs::rename(dir, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    // The session is gone once the rename lands; a leftover directory is
    // only clutter.
    if let Err(e) = fs::remove_dir_all(&aside) {
        warn!(path = %aside.display(), error = %e, "failed to remove cleared session directory");
    }
    Ok(())
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self) -> Result<Option<Session>> {
        let _guard = self.op.lock().await;
        let path = self.creds_path();
        tokio::task::spawn_blocking(move || read_session(&path)).await?
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let _guard = self.op.lock().await;
        let dir = self.dir.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || {
            write_session(&dir, &session)?;
            debug!(fingerprint = %session.fingerprint(), cursor = %session.cursor, "session saved");
            Ok(())
        })
        .await?
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.op.lock().await;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            remove_session_dir(&dir)?;
            debug!(dir = %dir.display(), "session cleared");
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{AccountId, IdentityKey};

    fn make_session(seed: u8) -> Session {
        Session::with_identity(IdentityKey::from_seed(&[seed; 32]), 77)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStore::new(root.path().join("session"));
        assert!(store.load().await.unwrap().is_none());

        let mut session = make_session(1);
        session.register(AccountId::new("27683913716@s.whatsapp.net"));
        store.save(&session).await.unwrap();

        assert!(store.dir().join("creds.json").exists());
        assert!(!store.dir().join("creds.json.tmp").exists());
        assert_eq!(store.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_clear_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStore::new(root.path().join("session"));
        store.save(&make_session(1)).await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.dir().exists());
        assert!(store.load().await.unwrap().is_none());

        // Idempotent.
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        // No leftovers beside the session directory.
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_save_after_clear() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStore::new(root.path().join("session"));
        store.save(&make_session(1)).await.unwrap();
        store.clear().await.unwrap();

        let fresh = make_session(2);
        store.save(&fresh).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_stale_cursor_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStore::new(root.path().join("session"));
        let old = make_session(1);
        let mut newer = old.clone();
        newer.cursor = old.cursor.next();

        store.save(&newer).await.unwrap();
        assert!(matches!(
            store.save(&old).await,
            Err(StoreError::StaleCursor { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("creds.json"), b"{not json").unwrap();

        let store = FileStore::new(&dir);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Serialization(_))
        ));

        // A fresh session can still be written over it.
        let fresh = make_session(3);
        store.save(&fresh).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(fresh));
    }
}
