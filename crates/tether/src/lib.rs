//! # Tether
//!
//! Keeps one authenticated messaging session alive.
//!
//! ## Overview
//!
//! Tether sits between a messaging transport and a bot's command layer. It:
//!
//! - **Connects**: loads the persisted session (or creates one) and opens
//!   the transport
//! - **Pairs**: requests a pairing code for the configured phone number and
//!   shows it to the operator
//! - **Recovers**: classifies every disconnect and either backs off,
//!   clears the session and pairs again, or stops for good on logout
//! - **Dispatches**: hands inbound messages to a [`MessageDispatcher`] once
//!   the connection is open, at most once per message id
//!
//! ## Key Types
//!
//! - [`ConnectionController`] - Drives the lifecycle state machine
//! - [`PairingController`] - Issues pairing codes, one at a time
//! - [`Supervisor`] - Restarts the controller after internal faults
//! - [`Settings`] - Every limit, delay and marker
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::{ConnectionController, LogDispatcher, Settings, Supervisor};
//! use tether::transport::console::ConsoleTransport;
//!
//! async fn example() {
//!     let settings = Settings {
//!         phone: "0683913716".into(),
//!         ..Settings::default()
//!     };
//!     let transport = Arc::new(ConsoleTransport::stdio());
//!     let store = settings.open_store().unwrap();
//!
//!     let supervisor = Supervisor::from_settings(&settings);
//!     let status = supervisor
//!         .run(
//!             |shutdown| {
//!                 let controller = ConnectionController::new(
//!                     transport.clone(),
//!                     store.clone(),
//!                     LogDispatcher,
//!                     &settings,
//!                     shutdown,
//!                 );
//!                 async move { controller?.run().await }
//!             },
//!             tether::shutdown_signal(),
//!         )
//!         .await;
//!     std::process::exit(status.code());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tether::core` - State machine, backoff, classification, phone numbers
//! - `tether::store` - Session stores
//! - `tether::transport` - Transport and dispatcher interfaces

pub mod controller;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod pairing;
pub mod settings;
pub mod supervisor;
pub mod timer;

// Re-export component crates
pub use tether_core as core;
pub use tether_store as store;
pub use tether_transport as transport;

pub use controller::{ConnectionController, LifecycleSnapshot, Outcome, StateChange};
pub use dispatch::{LogDispatcher, ReadyNotifier};
pub use error::{Result, TetherError};
pub use pairing::{OperatorConsole, PairingController, PairingNotice, StdoutConsole};
pub use settings::{PairingPolicy, Settings, StoreKind};
pub use supervisor::{shutdown_signal, ExitStatus, Supervisor};

pub use tether_core::{ConnectionState, DisconnectCause, FailureKind, LifecyclePolicy};
pub use tether_transport::MessageDispatcher;
