//! End-to-end lifecycle scenarios against the in-memory transport.
//!
//! Every test runs on paused tokio time, so reconnect and pairing delays
//! elapse instantly and can be measured exactly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tether::core::{AccountId, ConnectionState, RetryCounters};
use tether::store::{MemoryStore, SessionStore};
use tether::transport::memory::{MemoryRemote, MemoryTransport};
use tether::transport::{
    InboundMessage, MessageDispatcher, MessageId, TransportError, TransportHandle,
};
use tether::{
    ConnectionController, LifecycleSnapshot, OperatorConsole, Outcome, PairingNotice, Settings,
    StateChange, TetherError,
};
use tether_testkit::{
    message, registered_session, wait_for, FaultyStore, RecordingDispatcher, TEST_ACCOUNT,
    TEST_PHONE,
};

#[derive(Default)]
struct CapturedConsole {
    notices: Mutex<Vec<PairingNotice>>,
    logged_out: Mutex<u32>,
}

impl CapturedConsole {
    fn notices(&self) -> Vec<PairingNotice> {
        self.notices.lock().unwrap().clone()
    }

    fn logged_out(&self) -> u32 {
        *self.logged_out.lock().unwrap()
    }
}

impl OperatorConsole for CapturedConsole {
    fn show_pairing_code(&self, notice: &PairingNotice) {
        self.notices.lock().unwrap().push(notice.clone());
    }

    fn show_logged_out(&self, _fingerprint: Option<&str>) {
        *self.logged_out.lock().unwrap() += 1;
    }
}

struct Harness<S> {
    remote: MemoryRemote,
    store: Arc<S>,
    dispatcher: Arc<RecordingDispatcher>,
    console: Arc<CapturedConsole>,
    status: watch::Receiver<LifecycleSnapshot>,
    transitions: broadcast::Receiver<StateChange>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<tether::Result<Outcome>>,
}

impl<S: SessionStore + 'static> Harness<S> {
    fn start(store: S, settings: Settings, script: impl FnOnce(&MemoryRemote)) -> Self {
        let (transport, remote) = MemoryTransport::new();
        script(&remote);

        let store = Arc::new(store);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let console = Arc::new(CapturedConsole::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let controller = ConnectionController::new(
            transport,
            store.clone(),
            dispatcher.clone(),
            &settings,
            shutdown_rx,
        )
        .unwrap()
        .with_console(console.clone());
        let status = controller.status();
        let transitions = controller.transitions();
        let task = tokio::spawn(controller.run());

        Self {
            remote,
            store,
            dispatcher,
            console,
            status,
            transitions,
            shutdown,
            task,
        }
    }

    async fn wait(&mut self, pred: impl FnMut(&LifecycleSnapshot) -> bool) -> LifecycleSnapshot {
        wait_for(&mut self.status, pred).await
    }

    fn state_changes(&mut self) -> Vec<(ConnectionState, ConnectionState)> {
        let mut changes = Vec::new();
        while let Ok(change) = self.transitions.try_recv() {
            changes.push((change.from, change.to));
        }
        changes
    }

    async fn stop(self) -> tether::Result<Outcome> {
        self.shutdown.send_replace(true);
        self.task.await.unwrap()
    }

    async fn finish(self) -> tether::Result<Outcome> {
        self.task.await.unwrap()
    }
}

fn settings() -> Settings {
    Settings {
        phone: TEST_PHONE.into(),
        ..Settings::default()
    }
}

/// Paused time jumps straight to timer deadlines, at millisecond resolution.
fn assert_waited(since: Instant, expected: Duration) {
    let waited = since.elapsed();
    assert!(
        waited >= expected && waited < expected + Duration::from_millis(10),
        "waited {:?}, expected {:?}",
        waited,
        expected
    );
}

const GENERIC_DROP: &str = "Stream Errored (restart required)";

// ─────────────────────────────────────────────────────────────────────────────
// Pairing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pairing_flow_reaches_open() {
    let mut h = Harness::start(MemoryStore::new(), settings(), |_| {});

    let snapshot = h
        .wait(|s| s.state == ConnectionState::AwaitingPairing && s.pairing_codes_issued == 1)
        .await;
    assert_eq!(snapshot.counters.pairing_attempts, 1);

    let requested: Vec<String> = h
        .remote
        .pairing_requests()
        .iter()
        .map(|p| p.as_str().to_string())
        .collect();
    assert_eq!(requested, vec!["27683913716".to_string()]);

    let notices = h.console.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].attempt, 1);
    assert_eq!(notices[0].max_attempts, 3);
    assert_eq!(notices[0].phone.as_str(), "27683913716");

    // Not open yet: nothing reaches the dispatcher.
    assert!(h.remote.deliver(message("EARLY", "friend@s.whatsapp.net", "hi")).await);
    assert!(h.remote.complete_pairing().await);

    let snapshot = h.wait(|s| s.state == ConnectionState::Open).await;
    assert_eq!(snapshot.counters, RetryCounters::default());
    assert_eq!(snapshot.account, Some(AccountId::new(TEST_ACCOUNT)));
    assert_eq!(h.dispatcher.ready(), vec![AccountId::new(TEST_ACCOUNT)]);
    assert!(h.dispatcher.dispatched().is_empty());

    assert_eq!(
        h.state_changes(),
        vec![
            (ConnectionState::Idle, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::AwaitingPairing),
            (ConnectionState::AwaitingPairing, ConnectionState::Open),
        ]
    );

    let saved = h.store.current().unwrap();
    assert!(saved.is_registered());
    assert_eq!(saved.credentials.account, Some(AccountId::new(TEST_ACCOUNT)));

    assert_eq!(h.stop().await.unwrap(), Outcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_pairing_retry_after_failed_request() {
    let mut h = Harness::start(MemoryStore::new(), settings(), |remote| {
        remote.fail_pairing_requests(1)
    });

    let snapshot = h.wait(|s| s.pairing_retry_armed).await;
    assert_eq!(snapshot.pairing_codes_issued, 0);
    assert_eq!(snapshot.counters.pairing_attempts, 1);
    assert_eq!(h.remote.pairing_requests().len(), 1);
    assert!(h.console.notices().is_empty());
    let failed_at = Instant::now();

    let snapshot = h.wait(|s| s.pairing_codes_issued == 1).await;
    assert_waited(failed_at, settings().lifecycle.pairing_retry.delay(1));
    assert_eq!(snapshot.state, ConnectionState::AwaitingPairing);
    assert_eq!(snapshot.counters.pairing_attempts, 2);
    assert!(!snapshot.pairing_retry_armed);
    assert_eq!(h.remote.pairing_requests().len(), 2);

    let notices = h.console.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].attempt, 2);
    assert!(notices[0].to_string().contains("Attempt:  2/3"));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pairing_exhaustion_clears_and_cools_down() {
    let mut h = Harness::start(MemoryStore::new(), settings(), |remote| {
        remote.fail_pairing_requests(100)
    });

    let snapshot = h.wait(|s| s.sessions_cleared == 1).await;
    assert_eq!(snapshot.state, ConnectionState::ClosedRetryable);
    assert_eq!(snapshot.counters.pairing_attempts, 0);
    assert!(snapshot.reconnect_armed);
    assert!(!snapshot.pairing_retry_armed);
    assert_eq!(h.remote.pairing_requests().len(), 3);
    assert!(h.console.notices().is_empty());
    let exhausted_at = Instant::now();

    h.wait(|s| s.state == ConnectionState::AwaitingPairing).await;
    assert_waited(exhausted_at, Duration::from_secs(60));
    assert_eq!(h.remote.open_count(), 2);

    h.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Disconnects
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_auth_marker_clears_session_and_reconnects_after_fixed_delay() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.disconnect(Some(500), "Connection Failure").await);
    let snapshot = h.wait(|s| s.sessions_cleared == 1).await;
    assert_eq!(snapshot.state, ConnectionState::ClosedRetryable);
    assert_eq!(snapshot.counters.connection_attempts, 0);
    assert_eq!(h.store.clear_count(), 1);
    let cleared_at = Instant::now();

    let snapshot = h.wait(|s| s.state == ConnectionState::AwaitingPairing).await;
    assert_waited(cleared_at, Duration::from_secs(3));
    assert_eq!(snapshot.counters.connection_attempts, 0);

    let opened = h.remote.opened_sessions();
    assert_eq!(opened.len(), 2);
    assert!(opened[0].is_registered());
    assert!(!opened[1].is_registered());
    assert_ne!(opened[0].fingerprint(), opened[1].fingerprint());

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_network_marker_also_clears_session() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.disconnect(Some(408), "Request timed out").await);
    let snapshot = h.wait(|s| s.sessions_cleared == 1).await;
    assert_eq!(snapshot.counters.connection_attempts, 0);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_generic_disconnects_clear_session_at_limit() {
    let mut settings = settings();
    settings.lifecycle.max_connection_attempts = 4;
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings,
        |remote| remote.hold_handshake(true),
    );
    let remote = h.remote.clone();

    for attempt in 1..=3u32 {
        let scheduled = u64::from(attempt - 1);
        h.wait(|s| s.state == ConnectionState::Connecting && s.reconnects_scheduled == scheduled)
            .await;
        assert!(remote.disconnect(None, GENERIC_DROP).await);

        let snapshot = h
            .wait(|s| {
                s.state == ConnectionState::ClosedRetryable && s.reconnects_scheduled == scheduled + 1
            })
            .await;
        assert_eq!(snapshot.counters.connection_attempts, attempt);
        assert_eq!(snapshot.sessions_cleared, 0);
    }

    h.wait(|s| s.state == ConnectionState::Connecting && s.reconnects_scheduled == 3)
        .await;
    assert!(remote.disconnect(None, GENERIC_DROP).await);

    let snapshot = h.wait(|s| s.reconnects_scheduled == 4).await;
    assert_eq!(snapshot.sessions_cleared, 1);
    assert_eq!(snapshot.counters, RetryCounters::default());

    h.wait(|s| s.state == ConnectionState::AwaitingPairing).await;
    let opened = remote.opened_sessions();
    assert_eq!(opened.len(), 5);
    assert!(opened[..4].iter().all(|s| s.is_registered()));
    assert!(!opened[4].is_registered());

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_generic_disconnect_backs_off_and_reopens() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.disconnect(None, GENERIC_DROP).await);
    let snapshot = h.wait(|s| s.state == ConnectionState::ClosedRetryable).await;
    assert_eq!(snapshot.counters.connection_attempts, 1);
    let dropped_at = Instant::now();

    let snapshot = h
        .wait(|s| s.state == ConnectionState::Open && s.reconnects_scheduled == 1)
        .await;
    // base 3s + 1 * step 2s
    assert_waited(dropped_at, Duration::from_secs(5));
    assert_eq!(snapshot.counters, RetryCounters::default());
    assert_eq!(snapshot.sessions_cleared, 0);
    assert_eq!(h.remote.opened_sessions()[1], registered_session(1));
    assert_eq!(h.dispatcher.ready().len(), 2);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_is_a_disconnect() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |remote| remote.fail_next_open(TransportError::Network("connection refused".into())),
    );

    let snapshot = h.wait(|s| s.state == ConnectionState::ClosedRetryable).await;
    assert_eq!(snapshot.counters.connection_attempts, 1);
    assert_eq!(h.remote.open_count(), 0);

    h.wait(|s| s.state == ConnectionState::Open).await;
    assert_eq!(h.remote.open_count(), 1);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_logged_out_is_terminal() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;
    let remote = h.remote.clone();
    let store = h.store.clone();
    let console = h.console.clone();

    assert!(remote.disconnect(Some(401), "logged out").await);
    assert_eq!(h.finish().await.unwrap(), Outcome::LoggedOut);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(remote.open_count(), 1);
    assert_eq!(store.current(), Some(registered_session(1)));
    assert_eq!(store.clear_count(), 0);
    assert_eq!(console.logged_out(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_clear_is_fatal() {
    let store = FaultyStore::with_session(registered_session(1));
    store.fail_clears(2);
    let mut h = Harness::start(store, settings(), |_| {});
    h.wait(|s| s.state == ConnectionState::Open).await;
    let store = h.store.clone();

    assert!(h.remote.disconnect(None, "Connection Failure").await);
    let err = h.finish().await.unwrap_err();
    assert!(matches!(err, TetherError::SessionClear(_)));
    assert!(err.is_fatal());
    assert!(store.current().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_clear_retried_once() {
    let store = FaultyStore::with_session(registered_session(1));
    store.fail_clears(1);
    let mut h = Harness::start(store, settings(), |_| {});
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.disconnect(None, "Connection Failure").await);
    let snapshot = h.wait(|s| s.sessions_cleared == 1).await;
    assert!(snapshot.reconnect_armed);
    assert!(h.store.current().is_none());

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_keeps_stored_session() {
    let store = FaultyStore::with_session(registered_session(1));
    store.fail_loads(1);
    let mut h = Harness::start(store, settings(), |_| {});

    let snapshot = h.wait(|s| s.state == ConnectionState::ClosedRetryable).await;
    assert_eq!(snapshot.counters.connection_attempts, 1);
    assert!(snapshot.reconnect_armed);
    assert_eq!(h.remote.open_count(), 0);
    assert_eq!(h.store.current(), Some(registered_session(1)));
    let failed_at = Instant::now();

    let snapshot = h.wait(|s| s.state == ConnectionState::Open).await;
    assert_waited(failed_at, settings().lifecycle.reconnect.delay(1));
    assert_eq!(snapshot.sessions_cleared, 0);
    assert_eq!(h.remote.opened_sessions(), vec![registered_session(1)]);
    assert!(h.remote.pairing_requests().is_empty());

    let stored = h.store.current().unwrap();
    assert!(stored.is_registered());
    assert_eq!(stored.fingerprint(), registered_session(1).fingerprint());

    h.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_transport() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;
    let remote = h.remote.clone();
    let mut status = h.status.clone();

    assert_eq!(h.stop().await.unwrap(), Outcome::Stopped);
    assert_eq!(remote.close_count(), 1);
    assert!(!remote.is_connected());
    assert_eq!(status.borrow_and_update().state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;
    assert!(h.remote.disconnect(None, GENERIC_DROP).await);
    h.wait(|s| s.reconnect_armed).await;
    let remote = h.remote.clone();

    assert_eq!(h.stop().await.unwrap(), Outcome::Stopped);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.open_count(), 1);
    assert_eq!(remote.close_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_duplicates_and_own_messages_not_dispatched() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    let mut own = message("B", TEST_ACCOUNT, "from another device");
    own.from_me = true;
    for msg in [
        message("A", "friend@s.whatsapp.net", "!ping"),
        message("A", "friend@s.whatsapp.net", "!ping"),
        own,
        message("C", "friend@s.whatsapp.net", "!help"),
    ] {
        assert!(h.remote.deliver(msg).await);
    }

    h.wait(|s| s.messages_dispatched == 2).await;
    assert_eq!(h.dispatcher.dispatched_ids(), vec!["A", "C"]);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_auto_read_and_typing() {
    let mut settings = settings();
    settings.auto_read = true;
    settings.auto_typing = true;
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings,
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.deliver(message("A", "friend@s.whatsapp.net", "hi")).await);
    h.wait(|s| s.messages_dispatched == 1).await;

    assert_eq!(h.remote.read(), vec![MessageId::new("A")]);
    assert_eq!(
        h.remote.typing(),
        vec![
            ("friend@s.whatsapp.net".to_string(), true),
            ("friend@s.whatsapp.net".to_string(), false),
        ]
    );

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rotated_credentials_are_persisted() {
    let mut h = Harness::start(
        MemoryStore::with_session(registered_session(1)),
        settings(),
        |_| {},
    );
    h.wait(|s| s.state == ConnectionState::Open).await;

    assert!(h.remote.rotate_credentials().await);
    assert!(h.remote.deliver(message("A", "friend@s.whatsapp.net", "hi")).await);
    h.wait(|s| s.messages_dispatched == 1).await;

    let saved = h.store.current().unwrap();
    assert_eq!(saved.cursor, registered_session(1).cursor.next());
    assert_eq!(saved.fingerprint(), registered_session(1).fingerprint());

    h.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Slow commands
// ─────────────────────────────────────────────────────────────────────────────

/// A command layer that takes `delay` for every message.
struct SlowDispatcher {
    delay: Duration,
    started: AtomicU32,
    finished: AtomicU32,
}

impl SlowDispatcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicU32::new(0),
            finished: AtomicU32::new(0),
        }
    }

    async fn wait_started(&self) {
        while self.started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn finished(&self) -> u32 {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageDispatcher for SlowDispatcher {
    async fn on_ready(
        &self,
        _handle: &dyn TransportHandle,
        _account: &AccountId,
    ) -> tether::transport::Result<()> {
        Ok(())
    }

    async fn dispatch(
        &self,
        _handle: &dyn TransportHandle,
        _message: &InboundMessage,
    ) -> tether::transport::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SlowRun {
    remote: MemoryRemote,
    dispatcher: Arc<SlowDispatcher>,
    status: watch::Receiver<LifecycleSnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<tether::Result<Outcome>>,
}

async fn start_slow(delay: Duration) -> SlowRun {
    let (transport, remote) = MemoryTransport::new();
    let dispatcher = Arc::new(SlowDispatcher::new(delay));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let controller = ConnectionController::new(
        transport,
        MemoryStore::with_session(registered_session(1)),
        dispatcher.clone(),
        &settings(),
        shutdown_rx,
    )
    .unwrap()
    .with_console(Arc::new(CapturedConsole::default()));
    let mut status = controller.status();
    let task = tokio::spawn(controller.run());

    wait_for(&mut status, |s| s.state == ConnectionState::Open).await;
    assert!(remote.deliver(message("SLOW", "friend@s.whatsapp.net", "!report")).await);
    dispatcher.wait_started().await;

    SlowRun {
        remote,
        dispatcher,
        status,
        shutdown,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_command_does_not_delay_logout() {
    let run = start_slow(Duration::from_secs(25)).await;
    let since = Instant::now();

    assert!(run.remote.disconnect(Some(401), "logged out").await);
    assert_eq!(run.task.await.unwrap().unwrap(), Outcome::LoggedOut);
    assert!(since.elapsed() < Duration::from_secs(1));

    // The unfinished command was abandoned with the run.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(run.dispatcher.finished(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_command_does_not_delay_shutdown() {
    let run = start_slow(Duration::from_secs(25)).await;
    let since = Instant::now();

    run.shutdown.send_replace(true);
    assert_eq!(run.task.await.unwrap().unwrap(), Outcome::Stopped);
    assert!(since.elapsed() < Duration::from_secs(1));
    assert_eq!(run.remote.close_count(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(run.dispatcher.finished(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_command_completes_in_background() {
    let mut run = start_slow(Duration::from_secs(25)).await;

    // Timers still fire while the command runs.
    assert!(run.remote.disconnect(None, GENERIC_DROP).await);
    let snapshot = wait_for(&mut run.status, |s| {
        s.state == ConnectionState::Open && s.reconnects_scheduled == 1
    })
    .await;
    assert_eq!(snapshot.messages_dispatched, 0);
    assert_eq!(run.dispatcher.finished(), 0);

    let snapshot = wait_for(&mut run.status, |s| s.messages_dispatched == 1).await;
    assert_eq!(snapshot.state, ConnectionState::Open);
    assert_eq!(run.dispatcher.finished(), 1);

    run.shutdown.send_replace(true);
    assert_eq!(run.task.await.unwrap().unwrap(), Outcome::Stopped);
}
