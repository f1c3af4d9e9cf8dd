//! Console transport: stdin/stdout, for running Tether locally.
//!
//! Pairing happens on the terminal: the transport issues a code derived from
//! the session identity, the operator types it back, and the session is
//! registered. Once open, every typed line becomes an inbound message and
//! outgoing text is printed. Two commands simulate the network:
//!
//! - `/drop` closes the connection with a generic error
//! - `/logout` closes it with the logged-out status

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use tether_core::{
    AccountId, Blake3Hash, DisconnectReport, PairingCode, PhoneNumber, Session, LOGGED_OUT_STATUS,
};

use crate::error::{Result, TransportError};
use crate::event::{now_secs, ConnectionUpdate, InboundMessage, MessageId, TransportEvent};
use crate::transport::{OpenOptions, ProtocolVersion, Transport, TransportHandle};

const CONSOLE_CHAT: &str = "console";

type Input = Box<dyn AsyncRead + Send + Unpin>;
type Output = Box<dyn Write + Send>;

struct ConsoleLink {
    id: u64,
    session: Session,
    phone: Option<PhoneNumber>,
    code: Option<PairingCode>,
    events: mpsc::Sender<TransportEvent>,
}

struct ConsoleState {
    input: Option<Input>,
    next_link: u64,
    current: Option<ConsoleLink>,
}

struct ConsoleShared {
    state: Mutex<ConsoleState>,
    output: Mutex<Output>,
}

impl ConsoleShared {
    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn print(&self, line: &str) -> Result<()> {
        let mut out = self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Transport that talks to the local terminal.
pub struct ConsoleTransport {
    shared: Arc<ConsoleShared>,
}

impl ConsoleTransport {
    /// A transport on the process stdin and stdout.
    pub fn stdio() -> Self {
        Self::with_io(Box::new(tokio::io::stdin()), Box::new(std::io::stdout()))
    }

    /// A transport on arbitrary input and output.
    ///
    /// Input is read from the first `open` on, by a single task that
    /// outlives individual connections.
    pub fn with_io(input: Input, output: Output) -> Self {
        Self {
            shared: Arc::new(ConsoleShared {
                state: Mutex::new(ConsoleState {
                    input: Some(input),
                    next_link: 0,
                    current: None,
                }),
                output: Mutex::new(output),
            }),
        }
    }
}

/// Derive the code the operator must type back.
fn derive_code(session: &Session, phone: &PhoneNumber) -> Result<PairingCode> {
    let mut material = session.credentials.identity.public_key().as_bytes().to_vec();
    material.extend_from_slice(phone.as_str().as_bytes());
    let digest = Blake3Hash::hash(&material).to_hex().to_uppercase();
    PairingCode::parse(&digest[..PairingCode::LEN])
        .map_err(|e| TransportError::Network(e.to_string()))
}

/// Turn one input line into events for the current connection.
fn handle_line(
    shared: &ConsoleShared,
    line: &str,
) -> Option<(mpsc::Sender<TransportEvent>, Vec<TransportEvent>)> {
    let mut state = shared.state();
    let link = state.current.as_mut()?;

    if !link.session.is_registered() {
        let matches = match (&link.code, PairingCode::parse(line)) {
            (Some(expected), Ok(entered)) => *expected == entered,
            _ => false,
        };
        if !matches {
            drop(state);
            let _ = shared.print("enter the pairing code shown above to link this console");
            return None;
        }

        let user = link.phone.as_ref().map(|p| p.as_str()).unwrap_or("console");
        let account = AccountId::new(format!("{}@console", user));
        link.session.register(account.clone());
        link.session.cursor = link.session.cursor.next();
        link.code = None;
        info!(account = %account, "console paired");
        return Some((
            link.events.clone(),
            vec![
                TransportEvent::CredentialsChanged(link.session.clone()),
                TransportEvent::StateChanged(ConnectionUpdate::Open { account }),
            ],
        ));
    }

    let closed = |report: DisconnectReport| {
        vec![TransportEvent::StateChanged(ConnectionUpdate::Closed(report))]
    };
    let batch = match line {
        "/drop" => closed(DisconnectReport::new(None, "console connection dropped")),
        "/logout" => closed(DisconnectReport::new(
            Some(LOGGED_OUT_STATUS),
            "logged out from console",
        )),
        text => vec![TransportEvent::MessageReceived(InboundMessage {
            id: MessageId::random(),
            chat: CONSOLE_CHAT.into(),
            sender: CONSOLE_CHAT.into(),
            from_me: false,
            text: Some(text.to_string()),
            timestamp: now_secs(),
        })],
    };

    let events = link.events.clone();
    if matches!(line, "/drop" | "/logout") {
        state.current = None;
    }
    Some((events, batch))
}

async fn read_input(shared: Arc<ConsoleShared>, input: Input) {
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("console input closed");
                return;
            }
            Err(e) => {
                debug!(error = %e, "console input failed");
                return;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((events, batch)) = handle_line(&shared, line) {
            for event in batch {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    type Handle = ConsoleHandle;

    async fn fetch_version(&self) -> Result<ProtocolVersion> {
        Ok(ProtocolVersion::FALLBACK)
    }

    async fn open(
        &self,
        _options: &OpenOptions,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConsoleHandle> {
        let (id, input) = {
            let mut state = self.shared.state();
            state.next_link += 1;
            let id = state.next_link;
            state.current = Some(ConsoleLink {
                id,
                session: session.clone(),
                phone: None,
                code: None,
                events: events.clone(),
            });
            (id, state.input.take())
        };

        if let Some(input) = input {
            tokio::spawn(read_input(self.shared.clone(), input));
        }

        let mut batch = vec![ConnectionUpdate::Connecting];
        if let Some(account) = session
            .credentials
            .account
            .clone()
            .filter(|_| session.is_registered())
        {
            batch.push(ConnectionUpdate::Open { account });
        } else {
            batch.push(ConnectionUpdate::PairingRequired);
        }
        for update in batch {
            if events.send(TransportEvent::StateChanged(update)).await.is_err() {
                break;
            }
        }

        Ok(ConsoleHandle {
            id,
            shared: self.shared.clone(),
        })
    }
}

/// Handle to the console connection.
pub struct ConsoleHandle {
    id: u64,
    shared: Arc<ConsoleShared>,
}

impl ConsoleHandle {
    fn ensure_current(&self) -> Result<()> {
        match self.shared.state().current.as_ref() {
            Some(link) if link.id == self.id => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl TransportHandle for ConsoleHandle {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<PairingCode> {
        let mut state = self.shared.state();
        let link = match state.current.as_mut() {
            Some(link) if link.id == self.id => link,
            _ => return Err(TransportError::NotConnected),
        };
        let code = derive_code(&link.session, phone)?;
        link.phone = Some(phone.clone());
        link.code = Some(code.clone());
        Ok(code)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.ensure_current()?;
        self.shared.print(&format!("[{}] {}", to, text))
    }

    async fn mark_read(&self, message: &InboundMessage) -> Result<()> {
        self.ensure_current()?;
        debug!(id = %message.id, "console message read");
        Ok(())
    }

    async fn set_typing(&self, chat: &str, typing: bool) -> Result<()> {
        self.ensure_current()?;
        debug!(chat, typing, "console typing");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.shared.state();
        if matches!(state.current.as_ref(), Some(link) if link.id == self.id) {
            state.current = None;
        }
        Ok(())
    }
}
