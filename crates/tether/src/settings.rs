//! Runtime settings.
//!
//! Every retry limit, delay and marker is configuration. The binary builds
//! [`Settings`] from command-line flags and environment variables; tests
//! start from [`Settings::default`] and override what they need.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tether_core::{BackoffPolicy, CoreError, LifecyclePolicy, MarkerRules, PhoneNumber, PhoneRules};
use tether_store::{FileStore, SessionStore, SqliteStore, StoreError};
use tether_transport::OpenOptions;

/// Session storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StoreKind {
    /// A directory holding `creds.json`.
    #[default]
    File,
    /// `session.db` inside the session directory.
    Sqlite,
}

/// Pairing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingPolicy {
    pub phone_rules: PhoneRules,
    /// How long an issued code counts as pending.
    pub code_ttl: Duration,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            phone_rules: PhoneRules::default(),
            code_ttl: Duration::from_secs(180),
        }
    }
}

/// Everything the controller and supervisor need.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Display name used in the ready notice.
    pub bot_name: String,
    /// Address that receives the ready notice.
    pub owner: Option<String>,
    /// Number to pair, as configured; normalized at startup.
    pub phone: String,
    pub session_dir: PathBuf,
    pub store: StoreKind,
    /// Mark dispatched messages as read.
    pub auto_read: bool,
    /// Show the typing indicator while a message is dispatched.
    pub auto_typing: bool,
    pub lifecycle: LifecyclePolicy,
    pub pairing: PairingPolicy,
    pub markers: MarkerRules,
    pub open: OpenOptions,
    /// Bound on every external call.
    pub operation_timeout: Duration,
    /// Message ids remembered for duplicate suppression.
    pub dedup_capacity: usize,
    /// Controller restarts after internal faults before giving up.
    pub max_restarts: u32,
    pub restart_backoff: BackoffPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_name: "Tether".into(),
            owner: None,
            phone: String::new(),
            session_dir: PathBuf::from("session"),
            store: StoreKind::default(),
            auto_read: false,
            auto_typing: false,
            lifecycle: LifecyclePolicy::default(),
            pairing: PairingPolicy::default(),
            markers: MarkerRules::default(),
            open: OpenOptions::default(),
            operation_timeout: Duration::from_secs(30),
            dedup_capacity: 1024,
            max_restarts: 5,
            restart_backoff: BackoffPolicy::new(
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(30),
            ),
        }
    }
}

impl Settings {
    /// The configured phone number, normalized.
    pub fn phone_number(&self) -> Result<PhoneNumber, CoreError> {
        PhoneNumber::normalize(&self.phone, &self.pairing.phone_rules)
    }

    /// Reject settings the controller could never run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.phone_number()?;
        if self.lifecycle.max_connection_attempts == 0 {
            return Err(CoreError::ConfigInvalid(
                "max connection attempts must be at least 1".into(),
            ));
        }
        if self.lifecycle.max_pairing_attempts == 0 {
            return Err(CoreError::ConfigInvalid(
                "max pairing attempts must be at least 1".into(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(CoreError::ConfigInvalid(
                "operation timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Open the configured session store.
    pub fn open_store(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
        Ok(match self.store {
            StoreKind::File => Arc::new(FileStore::new(&self.session_dir)),
            StoreKind::Sqlite => {
                std::fs::create_dir_all(&self.session_dir)?;
                Arc::new(SqliteStore::open(self.session_dir.join("session.db"))?)
            }
        })
    }
}
