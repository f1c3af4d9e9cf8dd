//! # Tether Store
//!
//! Session persistence for Tether. Exactly one session is stored per
//! process; the store is the single owner of its persisted copy.
//!
//! ## Key Types
//!
//! - [`SessionStore`] - The async trait: `load`, `save`, `clear`
//! - [`FileStore`] - A session directory holding `creds.json`
//! - [`SqliteStore`] - A single-row SQLite table with versioned migrations
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tether_store::{FileStore, SessionStore};
//! use tether_core::Session;
//!
//! async fn example() {
//!     let store = FileStore::new("./session");
//!
//!     let session = match store.load().await.unwrap() {
//!         Some(session) => session,
//!         None => Session::fresh(),
//!     };
//!     store.save(&session).await.unwrap();
//!
//!     // Wipe-and-restart
//!     store.clear().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Durable saves**: `save` returns only after the data reached disk
//! - **Monotonic cursor**: saving an older cursor for the same identity is
//!   rejected with [`StoreError::StaleCursor`]
//! - **Idempotent clear**: clearing an empty store succeeds

pub mod error;
pub mod file;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{check_cursor, SessionStore};
