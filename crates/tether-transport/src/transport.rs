//! Transport abstraction.
//!
//! A transport implements the wire protocol and cryptography of the
//! messaging network. Implementations may speak WebSockets, a local
//! console, or a scripted in-memory peer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_core::{PairingCode, PhoneNumber, Session};

use crate::error::Result;
use crate::event::{InboundMessage, TransportEvent};

/// Protocol version advertised when opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub [u32; 3]);

impl ProtocolVersion {
    /// Version used when the remote cannot be asked.
    pub const FALLBACK: Self = Self([2, 3000, 1_015_901_307]);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Options for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub version: ProtocolVersion,
    /// Name shown in the account's linked-devices list.
    pub device_name: String,
    /// Whether the remote should replay history on first sync.
    pub sync_full_history: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            device_name: "Tether".into(),
            sync_full_history: false,
        }
    }
}

/// Opens connections.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    type Handle: TransportHandle + 'static;

    /// Ask the remote for the current protocol version.
    async fn fetch_version(&self) -> Result<ProtocolVersion>;

    /// Open a connection with `session`.
    ///
    /// Events of this connection are delivered on `events` in order. The
    /// transport drops its sender when the connection ends, so a stale
    /// connection can never deliver into a newer one's channel.
    async fn open(
        &self,
        options: &OpenOptions,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self::Handle>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    type Handle = T::Handle;

    async fn fetch_version(&self) -> Result<ProtocolVersion> {
        (**self).fetch_version().await
    }

    async fn open(
        &self,
        options: &OpenOptions,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self::Handle> {
        (**self).open(options, session, events).await
    }
}

/// Acts on one open connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Request a pairing code for `phone` on an unauthenticated connection.
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<PairingCode>;

    /// Send a text message.
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Mark a received message as read.
    async fn mark_read(&self, message: &InboundMessage) -> Result<()>;

    /// Show or hide the typing indicator in `chat`.
    async fn set_typing(&self, chat: &str, typing: bool) -> Result<()>;

    /// Close the connection without logging out.
    async fn close(&self) -> Result<()>;
}
