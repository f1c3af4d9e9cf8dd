//! A scripted in-memory transport for testing.
//!
//! [`MemoryTransport`] is handed to the code under test; the paired
//! [`MemoryRemote`] plays the messaging network. The remote decides how
//! opens, pairing requests and handshakes go, injects disconnects and
//! messages, and records everything the handles did.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use tether_core::{AccountId, DisconnectReport, PairingCode, PhoneNumber, Session};

use crate::error::{Result, TransportError};
use crate::event::{ConnectionUpdate, InboundMessage, MessageId, TransportEvent};
use crate::transport::{OpenOptions, ProtocolVersion, Transport, TransportHandle};

/// A text message sent through a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub to: String,
    pub text: String,
}

struct Link {
    id: u64,
    session: Session,
    phone: Option<PhoneNumber>,
    events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct RemoteState {
    version: Option<ProtocolVersion>,
    version_unavailable: bool,
    open_failures: VecDeque<TransportError>,
    pairing_failures: u32,
    hold_handshake: bool,
    next_link: u64,
    current: Option<Link>,
    opened: Vec<Session>,
    pairing_requests: Vec<PhoneNumber>,
    codes_issued: u32,
    sent: Vec<SentText>,
    read: Vec<MessageId>,
    typing: Vec<(String, bool)>,
    closes: u32,
}

impl RemoteState {
    fn current_for(&mut self, id: u64) -> Result<&mut Link> {
        match self.current.as_mut() {
            Some(link) if link.id == id => Ok(link),
            _ => Err(TransportError::NotConnected),
        }
    }
}

type Shared = Arc<Mutex<RemoteState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, RemoteState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn account_for(phone: Option<&PhoneNumber>) -> AccountId {
    let user = phone.map(|p| p.as_str()).unwrap_or("0");
    AccountId::new(format!("{}@s.whatsapp.net", user))
}

async fn emit(events: &mpsc::Sender<TransportEvent>, batch: Vec<TransportEvent>) {
    for event in batch {
        // A dropped receiver means the owner already moved on.
        if events.send(event).await.is_err() {
            debug!("memory transport event dropped: receiver closed");
            return;
        }
    }
}

/// The transport half, handed to the code under test.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Shared,
}

/// The network half, kept by the test.
#[derive(Clone)]
pub struct MemoryRemote {
    shared: Shared,
}

impl MemoryTransport {
    /// Create a connected transport/remote pair.
    pub fn new() -> (MemoryTransport, MemoryRemote) {
        let shared: Shared = Arc::new(Mutex::new(RemoteState::default()));
        (
            MemoryTransport {
                shared: shared.clone(),
            },
            MemoryRemote { shared },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Handle = MemoryHandle;

    async fn fetch_version(&self) -> Result<ProtocolVersion> {
        let state = lock(&self.shared);
        if state.version_unavailable {
            return Err(TransportError::Network("version endpoint unavailable".into()));
        }
        Ok(state.version.unwrap_or_default())
    }

    async fn open(
        &self,
        _options: &OpenOptions,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<MemoryHandle> {
        let (id, batch) = {
            let mut state = lock(&self.shared);
            if let Some(err) = state.open_failures.pop_front() {
                return Err(err);
            }

            state.next_link += 1;
            let id = state.next_link;
            state.opened.push(session.clone());

            let mut batch = vec![TransportEvent::StateChanged(ConnectionUpdate::Connecting)];
            if !session.is_registered() {
                batch.push(TransportEvent::StateChanged(ConnectionUpdate::PairingRequired));
            } else if !state.hold_handshake {
                let account = session
                    .credentials
                    .account
                    .clone()
                    .unwrap_or_else(|| account_for(None));
                batch.push(TransportEvent::StateChanged(ConnectionUpdate::Open { account }));
            }

            state.current = Some(Link {
                id,
                session: session.clone(),
                phone: None,
                events: events.clone(),
            });
            (id, batch)
        };

        emit(&events, batch).await;
        Ok(MemoryHandle {
            id,
            shared: self.shared.clone(),
        })
    }
}

/// Handle to one memory connection.
pub struct MemoryHandle {
    id: u64,
    shared: Shared,
}

#[async_trait]
impl TransportHandle for MemoryHandle {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<PairingCode> {
        let mut state = lock(&self.shared);
        state.current_for(self.id)?.phone = Some(phone.clone());
        state.pairing_requests.push(phone.clone());

        if state.pairing_failures > 0 {
            state.pairing_failures -= 1;
            return Err(TransportError::Network("pairing code request failed".into()));
        }

        state.codes_issued += 1;
        PairingCode::parse(&format!("TEST{:04}", state.codes_issued))
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let mut state = lock(&self.shared);
        state.current_for(self.id)?;
        state.sent.push(SentText {
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn mark_read(&self, message: &InboundMessage) -> Result<()> {
        let mut state = lock(&self.shared);
        state.current_for(self.id)?;
        state.read.push(message.id.clone());
        Ok(())
    }

    async fn set_typing(&self, chat: &str, typing: bool) -> Result<()> {
        let mut state = lock(&self.shared);
        state.current_for(self.id)?;
        state.typing.push((chat.to_string(), typing));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.shared);
        if state.current_for(self.id).is_ok() {
            state.current = None;
            state.closes += 1;
        }
        Ok(())
    }
}

impl MemoryRemote {
    // ─────────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────────

    /// Version reported by `fetch_version`; `None` makes it fail.
    pub fn set_version(&self, version: Option<ProtocolVersion>) {
        let mut state = lock(&self.shared);
        state.version_unavailable = version.is_none();
        state.version = version;
    }

    /// Fail the next `open` with `err`. Calls queue up.
    pub fn fail_next_open(&self, err: TransportError) {
        lock(&self.shared).open_failures.push_back(err);
    }

    /// Fail the next `n` pairing-code requests.
    pub fn fail_pairing_requests(&self, n: u32) {
        lock(&self.shared).pairing_failures = n;
    }

    /// Keep registered sessions in `Connecting` until [`Self::handshake`].
    pub fn hold_handshake(&self, hold: bool) {
        lock(&self.shared).hold_handshake = hold;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network-side events
    // ─────────────────────────────────────────────────────────────────────────

    /// The operator entered the code: register the session and open.
    ///
    /// Returns `false` if no connection is open.
    pub async fn complete_pairing(&self) -> bool {
        let (events, batch) = {
            let mut state = lock(&self.shared);
            let Some(link) = state.current.as_mut() else {
                return false;
            };
            let account = account_for(link.phone.as_ref());
            link.session.register(account.clone());
            link.session.cursor = link.session.cursor.next();
            (
                link.events.clone(),
                vec![
                    TransportEvent::CredentialsChanged(link.session.clone()),
                    TransportEvent::StateChanged(ConnectionUpdate::Open { account }),
                ],
            )
        };
        emit(&events, batch).await;
        true
    }

    /// Finish a held handshake.
    pub async fn handshake(&self) -> bool {
        let (events, account) = {
            let state = lock(&self.shared);
            let Some(link) = state.current.as_ref() else {
                return false;
            };
            let account = link
                .session
                .credentials
                .account
                .clone()
                .unwrap_or_else(|| account_for(link.phone.as_ref()));
            (link.events.clone(), account)
        };
        emit(
            &events,
            vec![TransportEvent::StateChanged(ConnectionUpdate::Open { account })],
        )
        .await;
        true
    }

    /// Advance the sync cursor and report the new credentials.
    pub async fn rotate_credentials(&self) -> bool {
        let (events, session) = {
            let mut state = lock(&self.shared);
            let Some(link) = state.current.as_mut() else {
                return false;
            };
            link.session.cursor = link.session.cursor.next();
            (link.events.clone(), link.session.clone())
        };
        emit(&events, vec![TransportEvent::CredentialsChanged(session)]).await;
        true
    }

    /// Close the current connection with the given status and reason.
    pub async fn disconnect(&self, status_code: Option<u16>, reason: &str) -> bool {
        let link = lock(&self.shared).current.take();
        let Some(link) = link else {
            return false;
        };
        let report = DisconnectReport::new(status_code, reason);
        emit(
            &link.events,
            vec![TransportEvent::StateChanged(ConnectionUpdate::Closed(report))],
        )
        .await;
        true
    }

    /// Deliver a message on the current connection.
    pub async fn deliver(&self, message: InboundMessage) -> bool {
        let events = lock(&self.shared).current.as_ref().map(|l| l.events.clone());
        let Some(events) = events else {
            return false;
        };
        emit(&events, vec![TransportEvent::MessageReceived(message)]).await;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).current.is_some()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.shared).opened.len()
    }

    /// Sessions passed to `open`, in order.
    pub fn opened_sessions(&self) -> Vec<Session> {
        lock(&self.shared).opened.clone()
    }

    pub fn pairing_requests(&self) -> Vec<PhoneNumber> {
        lock(&self.shared).pairing_requests.clone()
    }

    pub fn sent(&self) -> Vec<SentText> {
        lock(&self.shared).sent.clone()
    }

    pub fn read(&self) -> Vec<MessageId> {
        lock(&self.shared).read.clone()
    }

    pub fn typing(&self) -> Vec<(String, bool)> {
        lock(&self.shared).typing.clone()
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.shared).closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{IdentityKey, PhoneRules};

    fn unregistered() -> Session {
        Session::with_identity(IdentityKey::from_seed(&[9u8; 32]), 5)
    }

    fn phone() -> PhoneNumber {
        PhoneNumber::normalize("0683913716", &PhoneRules::default()).unwrap()
    }

    async fn next_update(rx: &mut mpsc::Receiver<TransportEvent>) -> ConnectionUpdate {
        match rx.recv().await {
            Some(TransportEvent::StateChanged(update)) => update,
            other => panic!("expected state change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pairing_flow() {
        let (transport, remote) = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(16);

        let handle = transport
            .open(&OpenOptions::default(), &unregistered(), tx)
            .await
            .unwrap();
        assert_eq!(next_update(&mut rx).await, ConnectionUpdate::Connecting);
        assert_eq!(next_update(&mut rx).await, ConnectionUpdate::PairingRequired);

        let code = handle.request_pairing_code(&phone()).await.unwrap();
        assert_eq!(code.to_string(), "TEST-0001");
        assert!(remote.complete_pairing().await);

        match rx.recv().await {
            Some(TransportEvent::CredentialsChanged(session)) => {
                assert!(session.is_registered());
                assert_eq!(
                    session.credentials.account.as_ref().map(|a| a.user()),
                    Some("27683913716")
                );
            }
            other => panic!("expected credentials, got {:?}", other),
        }
        assert!(matches!(
            next_update(&mut rx).await,
            ConnectionUpdate::Open { .. }
        ));
    }

    #[tokio::test]
    async fn test_registered_session_opens() {
        let (transport, _remote) = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = unregistered();
        session.register(AccountId::new("27683913716@s.whatsapp.net"));

        transport
            .open(&OpenOptions::default(), &session, tx)
            .await
            .unwrap();
        assert_eq!(next_update(&mut rx).await, ConnectionUpdate::Connecting);
        assert_eq!(
            next_update(&mut rx).await,
            ConnectionUpdate::Open {
                account: AccountId::new("27683913716@s.whatsapp.net")
            }
        );
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let (transport, remote) = MemoryTransport::new();
        remote.fail_next_open(TransportError::Timeout("open".into()));
        remote.fail_pairing_requests(1);
        remote.set_version(None);

        assert!(transport.fetch_version().await.is_err());

        let (tx, _rx) = mpsc::channel(16);
        assert!(matches!(
            transport
                .open(&OpenOptions::default(), &unregistered(), tx.clone())
                .await,
            Err(TransportError::Timeout(_))
        ));

        let handle = transport
            .open(&OpenOptions::default(), &unregistered(), tx)
            .await
            .unwrap();
        assert!(handle.request_pairing_code(&phone()).await.is_err());
        assert!(handle.request_pairing_code(&phone()).await.is_ok());
        assert_eq!(remote.pairing_requests().len(), 2);
        assert_eq!(remote.open_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_is_disconnected() {
        let (transport, remote) = MemoryTransport::new();
        let (tx, _rx) = mpsc::channel(16);
        let first = transport
            .open(&OpenOptions::default(), &unregistered(), tx.clone())
            .await
            .unwrap();
        let second = transport
            .open(&OpenOptions::default(), &unregistered(), tx)
            .await
            .unwrap();

        assert!(matches!(
            first.send_text("a", "b").await,
            Err(TransportError::NotConnected)
        ));
        second.send_text("a", "b").await.unwrap();

        first.close().await.unwrap();
        assert!(remote.is_connected());
        second.close().await.unwrap();
        assert!(!remote.is_connected());
        assert_eq!(remote.close_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_event_stream() {
        let (transport, remote) = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = transport
            .open(&OpenOptions::default(), &unregistered(), tx)
            .await
            .unwrap();

        assert!(remote.disconnect(Some(428), "Connection Closed").await);
        assert_eq!(next_update(&mut rx).await, ConnectionUpdate::Connecting);
        assert_eq!(next_update(&mut rx).await, ConnectionUpdate::PairingRequired);
        assert!(matches!(
            next_update(&mut rx).await,
            ConnectionUpdate::Closed(report) if report.status_code == Some(428)
        ));
        assert!(rx.recv().await.is_none());
    }
}
