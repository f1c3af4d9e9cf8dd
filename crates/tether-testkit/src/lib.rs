//! # Tether Testkit
//!
//! Testing utilities for Tether.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Phone numbers and disconnect reports with their
//!   expected normalization and classification
//! - **Generators**: Proptest strategies for lifecycle events, disconnect
//!   reports, backoff policies and raw phone numbers
//! - **Fixtures**: A recording dispatcher, a fault-injecting store, and
//!   helpers for waiting on controller status
//!
//! ## Golden Vectors
//!
//! ```rust
//! use tether_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tether_core::{Lifecycle, LifecyclePolicy};
//! use tether_testkit::generators::lifecycle_events;
//!
//! proptest! {
//!     #[test]
//!     fn never_two_reconnect_timers(events in lifecycle_events(64)) {
//!         let policy = LifecyclePolicy::default();
//!         let mut lifecycle = Lifecycle::new();
//!         for event in events {
//!             lifecycle = lifecycle.step(event, &policy).next;
//!         }
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tether_testkit::fixtures::{registered_session, FaultyStore};
//!
//! let store = FaultyStore::with_session(registered_session(1));
//! store.fail_clears(2);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    message, registered_session, unregistered_session, wait_for, FaultyStore,
    RecordingDispatcher, TEST_ACCOUNT, TEST_PHONE,
};
pub use generators::{disconnect_report, lifecycle_event, lifecycle_events};
pub use vectors::{classifier_vectors, phone_vectors, verify_all_vectors, ClassifierVector, PhoneVector};
