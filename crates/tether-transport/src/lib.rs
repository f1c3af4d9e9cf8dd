//! # Tether Transport
//!
//! Interfaces between the connection controller and the outside world.
//!
//! ## Overview
//!
//! The wire protocol of the messaging network is not implemented here.
//! A [`Transport`] opens authenticated connections and reports what happens
//! on them as [`TransportEvent`]s on a channel owned by the connection. The
//! [`TransportHandle`] it returns is the only way to act on the connection.
//! Inbound messages are handed to a [`MessageDispatcher`] once the
//! connection is open.
//!
//! ## Implementations
//!
//! - [`memory::MemoryTransport`] - Scripted transport driven by a
//!   [`memory::MemoryRemote`], for tests
//! - [`console::ConsoleTransport`] - stdin/stdout transport for local runs
//!
//! ## Event Flow
//!
//! ```text
//! Controller                          Transport
//!   |-------- fetch_version ---------->|
//!   |-------- open(session, tx) ------>|
//!   |<------- StateChanged(Connecting)-|
//!   |<------- StateChanged(Pairing) ---|
//!   |-------- request_pairing_code --->|
//!   |<------- CredentialsChanged ------|
//!   |<------- StateChanged(Open) ------|
//!   |<------- MessageReceived ---------|
//!   |<------- StateChanged(Closed) ----|
//! ```

pub mod console;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod memory;
pub mod transport;

pub use dispatch::MessageDispatcher;
pub use error::{Result, TransportError};
pub use event::{ConnectionUpdate, InboundMessage, MessageId, TransportEvent};
pub use transport::{OpenOptions, ProtocolVersion, Transport, TransportHandle};
