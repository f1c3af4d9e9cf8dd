//! Events emitted by an open connection.

use serde::{Deserialize, Serialize};
use std::fmt;

use tether_core::{AccountId, DisconnectReport, Session};

/// Identifier of a message, unique per chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random 16-hex-digit id.
    pub fn random() -> Self {
        Self(hex::encode(rand::random::<[u8; 8]>()).to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    /// The chat the message belongs to.
    pub chat: String,
    /// The author; equal to `chat` in direct chats.
    pub sender: String,
    /// Sent by this account, possibly from another device.
    pub from_me: bool,
    /// Text body, if the message has one.
    pub text: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl InboundMessage {
    /// A direct text message from `sender`.
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            id: MessageId::random(),
            chat: sender.clone(),
            sender,
            from_me: false,
            text: Some(text.into()),
            timestamp: now_secs(),
        }
    }
}

/// Connection state as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// The socket is up; the handshake is in progress.
    Connecting,
    /// The handshake completed for `account`.
    Open { account: AccountId },
    /// The session has no valid credentials; a pairing code is needed.
    PairingRequired,
    /// The connection closed.
    Closed(DisconnectReport),
}

/// Everything a connection reports to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(ConnectionUpdate),
    /// The credentials changed and must be persisted.
    CredentialsChanged(Session),
    MessageReceived(InboundMessage),
}

pub(crate) fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
