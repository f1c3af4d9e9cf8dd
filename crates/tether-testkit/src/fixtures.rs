//! Test fixtures and helpers.
//!
//! Common setup code for controller and integration tests.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use tether_core::{AccountId, IdentityKey, Session};
use tether_store::{MemoryStore, SessionStore, StoreError};
use tether_transport::{InboundMessage, MessageDispatcher, MessageId, TransportHandle};

/// A phone number in local format that normalizes under the default rules.
pub const TEST_PHONE: &str = "0683913716";

/// The account a memory transport registers for [`TEST_PHONE`].
pub const TEST_ACCOUNT: &str = "27683913716@s.whatsapp.net";

/// How long [`wait_for`] waits before failing the test.
const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// An unregistered session with a deterministic identity.
pub fn unregistered_session(seed: u8) -> Session {
    Session::with_identity(IdentityKey::from_seed(&[seed; 32]), u16::from(seed) + 1)
}

/// A session already paired to [`TEST_ACCOUNT`].
pub fn registered_session(seed: u8) -> Session {
    let mut session = unregistered_session(seed);
    session.register(AccountId::new(TEST_ACCOUNT));
    session
}

/// A direct text message with a fixed id.
pub fn message(id: &str, sender: &str, text: &str) -> InboundMessage {
    let mut message = InboundMessage::text(sender, text);
    message.id = MessageId::new(id);
    message
}

/// Wait until the watched value satisfies `pred`, returning that value.
///
/// Panics if the condition does not hold within ten minutes of (possibly
/// paused) tokio time, or if the sender goes away first.
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let wait = async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                let current = rx.borrow().clone();
                if pred(&current) {
                    return current;
                }
                panic!("watch sender dropped before the condition held");
            }
        }
    };
    match tokio::time::timeout(WAIT_LIMIT, wait).await {
        Ok(value) => value,
        Err(_) => panic!("condition not reached within {:?}", WAIT_LIMIT),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordingDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Dispatcher that records everything it is handed.
#[derive(Default)]
pub struct RecordingDispatcher {
    ready: Mutex<Vec<AccountId>>,
    dispatched: Mutex<Vec<InboundMessage>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts passed to `on_ready`, in order.
    pub fn ready(&self) -> Vec<AccountId> {
        self.ready.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Messages passed to `dispatch`, in order.
    pub fn dispatched(&self) -> Vec<InboundMessage> {
        self.dispatched.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn dispatched_ids(&self) -> Vec<String> {
        self.dispatched()
            .into_iter()
            .map(|m| m.id.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn on_ready(
        &self,
        _handle: &dyn TransportHandle,
        account: &AccountId,
    ) -> tether_transport::Result<()> {
        self.ready
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(account.clone());
        Ok(())
    }

    async fn dispatch(
        &self,
        _handle: &dyn TransportHandle,
        message: &InboundMessage,
    ) -> tether_transport::Result<()> {
        self.dispatched
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FaultyStore
// ─────────────────────────────────────────────────────────────────────────────

/// A [`MemoryStore`] whose next operations can be made to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    load_failures: AtomicU32,
    save_failures: AtomicU32,
    clear_failures: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: MemoryStore::with_session(session),
            ..Self::default()
        }
    }

    /// Fail the next `n` loads.
    pub fn fail_loads(&self, n: u32) {
        self.load_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` saves.
    pub fn fail_saves(&self, n: u32) {
        self.save_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` clears.
    pub fn fail_clears(&self, n: u32) {
        self.clear_failures.store(n, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.current()
    }

    /// Successful clears.
    pub fn clear_count(&self) -> u64 {
        self.inner.clear_count()
    }

    fn trip(counter: &AtomicU32, what: &str) -> tether_store::Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {} failure", what),
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn load(&self) -> tether_store::Result<Option<Session>> {
        Self::trip(&self.load_failures, "load")?;
        self.inner.load().await
    }

    async fn save(&self, session: &Session) -> tether_store::Result<()> {
        Self::trip(&self.save_failures, "save")?;
        self.inner.save(session).await
    }

    async fn clear(&self) -> tether_store::Result<()> {
        Self::trip(&self.clear_failures, "clear")?;
        self.inner.clear().await
    }
}
