//! The connection controller: one task that keeps one session connected.
//!
//! The controller owns the transport handle, the session, and both retry
//! timers. Each transport event, timer expiry, or shutdown request becomes
//! a [`LifecycleEvent`]; [`Lifecycle::step`] decides the next state and the
//! effects, and the controller performs them in order. Effects may feed
//! follow-up events back into the same step queue (a failed `open` or a
//! failed session load becomes a disconnect, an issued pairing code becomes
//! `PairingIssued`).
//!
//! ## Concurrency
//!
//! Everything runs on the task that calls [`ConnectionController::run`].
//! Transport events arrive on a channel owned by the current connection and
//! are handled one at a time. Replacing or releasing the connection drops
//! its channel, so a stale connection can never drive a newer one. Every
//! lifecycle call is bounded by the operation timeout.
//!
//! Inbound messages are filtered on the controller task and handed to a
//! dispatch worker, which runs the command layer one message at a time. A
//! slow command never holds up disconnects, timers or shutdown; the worker
//! is aborted when the run ends.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tether_core::{
    AccountId, ConnectionState, DisconnectCause, DisconnectClassifier, DisconnectReport, Effect,
    FailureKind, Lifecycle, LifecycleEvent, LifecyclePolicy, RetryCounters, Session,
};
use tether_store::{SessionStore, StoreError};
use tether_transport::{
    ConnectionUpdate, InboundMessage, MessageDispatcher, MessageId, OpenOptions, Transport,
    TransportError, TransportEvent, TransportHandle,
};

use crate::dedup::RecentIds;
use crate::error::{Result, TetherError};
use crate::pairing::{OperatorConsole, PairingController, StdoutConsole};
use crate::settings::Settings;
use crate::timer::TimerSlot;

/// Buffer of the per-connection event channel.
const EVENT_BUFFER: usize = 64;

/// Buffer of the state-change broadcast.
const TRANSITION_BUFFER: usize = 64;

/// Messages queued for the dispatch worker before new ones are dropped.
const DISPATCH_BUFFER: usize = 256;

/// Attempts at clearing the session before giving up.
const CLEAR_ATTEMPTS: u32 = 2;

/// Observable state of a running controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub state: ConnectionState,
    pub counters: RetryCounters,
    pub reconnect_armed: bool,
    pub pairing_retry_armed: bool,
    /// Successful session clears since start.
    pub sessions_cleared: u64,
    /// Reconnect timers armed since start.
    pub reconnects_scheduled: u64,
    pub pairing_codes_issued: u64,
    pub messages_dispatched: u64,
    /// Account of the open connection.
    pub account: Option<AccountId>,
}

/// A state change, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub snapshot: LifecycleSnapshot,
}

/// How a controller run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Shut down on request.
    Stopped,
    /// The session was logged out; manual intervention required.
    LoggedOut,
}

#[derive(Debug, Default)]
struct Stats {
    sessions_cleared: u64,
    reconnects_scheduled: u64,
    pairing_codes_issued: u64,
    messages_dispatched: u64,
}

enum Wake {
    Shutdown,
    Transport(Option<TransportEvent>),
    Dispatched(Option<bool>),
    ReconnectDue,
    PairingRetryDue,
}

/// A message for the dispatch worker, with the connection it arrived on.
struct DispatchJob<H> {
    handle: Arc<H>,
    message: InboundMessage,
}

#[derive(Debug, Clone, Copy)]
struct DispatchOptions {
    auto_read: bool,
    auto_typing: bool,
    /// Bounds mark-read and typing calls; the command itself is unbounded.
    timeout: Duration,
}

/// Drives one session through its lifecycle.
pub struct ConnectionController<T: Transport, S: SessionStore, D: MessageDispatcher> {
    transport: T,
    store: S,
    dispatcher: Arc<D>,
    classifier: Arc<dyn DisconnectClassifier>,
    policy: LifecyclePolicy,
    open_options: OpenOptions,
    timeout: Duration,
    dispatch_options: DispatchOptions,

    lifecycle: Lifecycle,
    pairing: PairingController,
    reconnect: TimerSlot,
    pairing_retry: TimerSlot,
    handle: Option<Arc<T::Handle>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    jobs: Option<mpsc::Sender<DispatchJob<T::Handle>>>,
    completions: Option<mpsc::Receiver<bool>>,
    workers: JoinSet<()>,
    session: Option<Session>,
    account: Option<AccountId>,
    recent: RecentIds<MessageId>,
    stats: Stats,

    status: watch::Sender<LifecycleSnapshot>,
    transitions: broadcast::Sender<StateChange>,
    shutdown: watch::Receiver<bool>,
}

impl<T, S, D> ConnectionController<T, S, D>
where
    T: Transport,
    S: SessionStore,
    D: MessageDispatcher + 'static,
{
    /// Create a controller. Invalid settings fail here, before any I/O.
    ///
    /// The controller stops once `shutdown` holds `true` or its sender is
    /// dropped.
    pub fn new(
        transport: T,
        store: S,
        dispatcher: D,
        settings: &Settings,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        settings.validate()?;
        let pairing = PairingController::new(
            &settings.phone,
            &settings.pairing,
            settings.lifecycle.max_pairing_attempts,
            settings.operation_timeout,
            Arc::new(StdoutConsole),
        )?;
        let (status, _) = watch::channel(LifecycleSnapshot::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        Ok(Self {
            transport,
            store,
            dispatcher: Arc::new(dispatcher),
            classifier: Arc::new(settings.markers.clone()),
            policy: settings.lifecycle.clone(),
            open_options: settings.open.clone(),
            timeout: settings.operation_timeout,
            dispatch_options: DispatchOptions {
                auto_read: settings.auto_read,
                auto_typing: settings.auto_typing,
                timeout: settings.operation_timeout,
            },
            lifecycle: Lifecycle::new(),
            pairing,
            reconnect: TimerSlot::new("reconnect"),
            pairing_retry: TimerSlot::new("pairing_retry"),
            handle: None,
            events: None,
            jobs: None,
            completions: None,
            workers: JoinSet::new(),
            session: None,
            account: None,
            recent: RecentIds::new(settings.dedup_capacity),
            stats: Stats::default(),
            status,
            transitions,
            shutdown,
        })
    }

    /// Replace the disconnect classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn DisconnectClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the operator console.
    pub fn with_console(mut self, console: Arc<dyn OperatorConsole>) -> Self {
        self.pairing.set_console(console);
        self
    }

    /// Watch the latest snapshot.
    pub fn status(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.status.subscribe()
    }

    /// Subscribe to state changes.
    pub fn transitions(&self) -> broadcast::Receiver<StateChange> {
        self.transitions.subscribe()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            state: self.lifecycle.state,
            counters: self.lifecycle.counters,
            reconnect_armed: self.lifecycle.reconnect_armed,
            pairing_retry_armed: self.lifecycle.pairing_retry_armed,
            sessions_cleared: self.stats.sessions_cleared,
            reconnects_scheduled: self.stats.reconnects_scheduled,
            pairing_codes_issued: self.stats.pairing_codes_issued,
            messages_dispatched: self.stats.messages_dispatched,
            account: self.account.clone(),
        }
    }

    /// Run until shutdown or logout.
    ///
    /// Failures inside a connection or pairing attempt never end the run;
    /// they become the next transition. Only an uncleared session does.
    pub async fn run(mut self) -> Result<Outcome> {
        info!(phone = %self.pairing.phone(), "connection controller starting");
        self.start_dispatch_worker();
        self.apply(LifecycleEvent::Start).await?;

        loop {
            let stop_requested = *self.shutdown.borrow();
            if stop_requested {
                return self.stop().await;
            }
            if self.lifecycle.state.is_terminal() {
                return Ok(Outcome::LoggedOut);
            }

            let wake = tokio::select! {
                biased;

                changed = self.shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => Wake::Shutdown,
                },
                event = recv_or_pending(&mut self.events) => Wake::Transport(event),
                done = recv_or_pending(&mut self.completions) => Wake::Dispatched(done),
                _ = self.reconnect.fired() => Wake::ReconnectDue,
                _ = self.pairing_retry.fired() => Wake::PairingRetryDue,
            };

            match wake {
                Wake::Shutdown => return self.stop().await,
                Wake::Transport(Some(event)) => self.on_transport_event(event).await?,
                Wake::Transport(None) => {
                    self.events = None;
                    let report = DisconnectReport::new(None, "event stream ended");
                    let cause = self.classify(&report);
                    warn!(cause = %cause, "transport event stream ended");
                    self.apply(LifecycleEvent::Disconnected(cause)).await?;
                }
                Wake::Dispatched(Some(ok)) => {
                    if ok {
                        self.stats.messages_dispatched += 1;
                        self.status.send_replace(self.snapshot());
                    }
                }
                Wake::Dispatched(None) => {
                    warn!("dispatch worker stopped; restarting it");
                    self.start_dispatch_worker();
                }
                Wake::ReconnectDue => self.apply(LifecycleEvent::ReconnectDue).await?,
                Wake::PairingRetryDue => self.apply(LifecycleEvent::PairingRetryDue).await?,
            }
        }
    }

    async fn stop(&mut self) -> Result<Outcome> {
        info!("shutdown requested");
        self.stop_dispatch_worker();
        self.apply(LifecycleEvent::Shutdown).await?;
        Ok(Outcome::Stopped)
    }

    fn start_dispatch_worker(&mut self) {
        self.stop_dispatch_worker();
        let (jobs, queue) = mpsc::channel(DISPATCH_BUFFER);
        let (done, completions) = mpsc::channel(DISPATCH_BUFFER);
        self.workers.spawn(dispatch_worker(
            queue,
            done,
            self.dispatcher.clone(),
            self.dispatch_options,
        ));
        self.jobs = Some(jobs);
        self.completions = Some(completions);
    }

    /// Abort the worker; queued messages are dropped.
    fn stop_dispatch_worker(&mut self) {
        self.jobs = None;
        self.completions = None;
        self.workers.abort_all();
    }

    fn classify(&self, report: &DisconnectReport) -> DisconnectCause {
        self.classifier.classify(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stepping
    // ─────────────────────────────────────────────────────────────────────────

    async fn apply(&mut self, event: LifecycleEvent) -> Result<()> {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let from = self.lifecycle.state;
            let transition = self.lifecycle.step(event, &self.policy);
            self.lifecycle = transition.next;
            let to = self.lifecycle.state;

            if from != to {
                info!(from = %from, to = %to, "connection state changed");
            } else {
                debug!(?event, state = %to, "lifecycle event");
            }

            for effect in transition.effects {
                if let Some(follow_up) = self.execute(effect).await? {
                    queue.push_back(follow_up);
                }
            }

            let snapshot = self.snapshot();
            self.status.send_replace(snapshot.clone());
            if from != to {
                // No subscribers is fine.
                let _ = self.transitions.send(StateChange { from, to, snapshot });
            }
        }
        Ok(())
    }

    async fn execute(&mut self, effect: Effect) -> Result<Option<LifecycleEvent>> {
        match effect {
            Effect::OpenTransport => return Ok(self.open_transport().await),
            Effect::ReleaseTransport => {
                self.handle = None;
                self.events = None;
                self.account = None;
                self.pairing.abandon();
            }
            Effect::CloseTransport => {
                self.events = None;
                self.account = None;
                self.pairing.abandon();
                if let Some(handle) = self.handle.take() {
                    if let Err(e) = bounded(self.timeout, "close", handle.close()).await {
                        warn!(error = %e, "transport close failed");
                    }
                }
            }
            Effect::ScheduleReconnect(delay) => {
                if self.reconnect.arm(delay) {
                    self.stats.reconnects_scheduled += 1;
                    info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                } else {
                    already_armed(&self.reconnect);
                }
            }
            Effect::CancelReconnect => {
                if self.reconnect.cancel() {
                    debug!("reconnect cancelled");
                }
            }
            Effect::SchedulePairingRetry(delay) => {
                if self.pairing_retry.arm(delay) {
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = self.lifecycle.counters.pairing_attempts,
                        "pairing retry scheduled"
                    );
                } else {
                    already_armed(&self.pairing_retry);
                }
            }
            Effect::CancelPairingRetry => {
                self.pairing_retry.cancel();
            }
            Effect::RequestPairing { attempt } => {
                let Some(handle) = self.handle.as_deref() else {
                    warn!(attempt, "pairing requested without a connection");
                    return Ok(Some(LifecycleEvent::PairingFailed));
                };
                return Ok(Some(match self.pairing.request(handle, attempt).await {
                    Ok(_) => {
                        self.stats.pairing_codes_issued += 1;
                        LifecycleEvent::PairingIssued
                    }
                    Err(_) => LifecycleEvent::PairingFailed,
                }));
            }
            Effect::ClearSession(kind) => self.clear_session(kind).await?,
            Effect::NotifyReady => self.notify_ready().await,
            Effect::ReportTerminal => {
                let fingerprint = self.session.as_ref().map(Session::fingerprint);
                error!(
                    fingerprint = fingerprint.as_deref().unwrap_or("unknown"),
                    "session logged out; manual intervention required"
                );
                self.pairing.report_logged_out(fingerprint.as_deref());
            }
        }
        Ok(None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Effects
    // ─────────────────────────────────────────────────────────────────────────

    async fn open_transport(&mut self) -> Option<LifecycleEvent> {
        let session = match self.load_session().await {
            Ok(session) => session,
            Err(e) => {
                // The stored credentials may be fine; retry rather than replace them.
                warn!(error = %e, "session load failed; transport not opened");
                return Some(LifecycleEvent::Disconnected(DisconnectCause::Unknown));
            }
        };

        let version = match bounded(self.timeout, "version fetch", self.transport.fetch_version())
            .await
        {
            Ok(version) => version,
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.open_options.version,
                    "version fetch failed; using fallback"
                );
                self.open_options.version
            }
        };
        let options = OpenOptions {
            version,
            ..self.open_options.clone()
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let opened = tokio::time::timeout(self.timeout, self.transport.open(&options, &session, tx))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout("open".into())));

        match opened {
            Ok(handle) => {
                debug!(
                    fingerprint = %session.fingerprint(),
                    registered = session.is_registered(),
                    version = %version,
                    "transport opened"
                );
                self.handle = Some(Arc::new(handle));
                self.events = Some(rx);
                self.session = Some(session);
                None
            }
            Err(e) => {
                let report = e.disconnect_report();
                let cause = self.classify(&report);
                warn!(
                    cause = %cause,
                    status = ?report.status_code,
                    reason = %report.reason,
                    "transport open failed"
                );
                self.session = Some(session);
                Some(LifecycleEvent::Disconnected(cause))
            }
        }
    }

    /// The persisted session, or a fresh one when none is stored.
    ///
    /// A failed load is an error: only an empty store yields a new identity.
    async fn load_session(&mut self) -> Result<Session> {
        if let Some(session) = bounded(self.timeout, "session load", self.store.load()).await? {
            debug!(fingerprint = %session.fingerprint(), "session loaded");
            return Ok(session);
        }
        debug!("no persisted session");

        let session = Session::fresh();
        match bounded(self.timeout, "session save", self.store.save(&session)).await {
            Ok(()) => info!(fingerprint = %session.fingerprint(), "created fresh session"),
            Err(e) => warn!(error = %e, "failed to persist fresh session"),
        }
        Ok(session)
    }

    async fn persist(&mut self, session: Session) {
        match bounded(self.timeout, "session save", self.store.save(&session)).await {
            Ok(()) => {
                debug!(
                    fingerprint = %session.fingerprint(),
                    cursor = %session.cursor,
                    "credentials saved"
                );
                self.session = Some(session);
            }
            Err(e) => warn!(error = %e, "failed to save credentials"),
        }
    }

    /// Clear the persisted session, retrying once.
    async fn clear_session(&mut self, kind: FailureKind) -> Result<()> {
        let fingerprint = self.session.as_ref().map(Session::fingerprint);
        let mut last_error = None;

        for attempt in 1..=CLEAR_ATTEMPTS {
            let cleared = tokio::time::timeout(self.timeout, self.store.clear())
                .await
                .unwrap_or_else(|_| Err(StoreError::Task("session clear timed out".into())));
            match cleared {
                Ok(()) => {
                    self.stats.sessions_cleared += 1;
                    self.session = None;
                    info!(
                        reason = ?kind,
                        fingerprint = fingerprint.as_deref().unwrap_or("none"),
                        "session cleared"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "session clear failed");
                    last_error = Some(e);
                }
            }
        }

        let err =
            last_error.unwrap_or_else(|| StoreError::Task("session clear not attempted".into()));
        error!(error = %err, "giving up on clearing the session");
        Err(TetherError::SessionClear(err))
    }

    async fn notify_ready(&mut self) {
        if let Some(pending) = self.pairing.resolve() {
            info!(
                attempt = pending.attempt,
                waited_ms = pending.requested_at.elapsed().as_millis() as u64,
                "pairing completed"
            );
        }

        let (Some(handle), Some(account)) = (self.handle.as_deref(), self.account.as_ref()) else {
            return;
        };
        info!(account = %account, "connection open");
        let notified = self.dispatcher.on_ready(handle, account);
        if let Err(e) = bounded(self.timeout, "ready notification", notified).await {
            warn!(error = %e, "ready notification failed");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport events
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::StateChanged(ConnectionUpdate::Connecting) => {
                debug!("transport connecting");
                Ok(())
            }
            TransportEvent::StateChanged(ConnectionUpdate::PairingRequired) => {
                self.apply(LifecycleEvent::PairingRequired).await
            }
            TransportEvent::StateChanged(ConnectionUpdate::Open { account }) => {
                self.account = Some(account);
                self.apply(LifecycleEvent::HandshakeComplete).await
            }
            TransportEvent::StateChanged(ConnectionUpdate::Closed(report)) => {
                let cause = self.classify(&report);
                warn!(
                    cause = %cause,
                    status = ?report.status_code,
                    reason = %report.reason,
                    "connection closed"
                );
                self.apply(LifecycleEvent::Disconnected(cause)).await
            }
            TransportEvent::CredentialsChanged(session) => {
                self.persist(session).await;
                Ok(())
            }
            TransportEvent::MessageReceived(message) => {
                self.dispatch_message(message);
                Ok(())
            }
        }
    }

    /// Filter `message` and queue it for the dispatch worker.
    fn dispatch_message(&mut self, message: InboundMessage) {
        if self.lifecycle.state != ConnectionState::Open {
            debug!(id = %message.id, state = %self.lifecycle.state, "message before open dropped");
            return;
        }
        if message.from_me {
            return;
        }
        if !self.recent.insert(message.id.clone()) {
            debug!(id = %message.id, "duplicate message dropped");
            return;
        }
        let (Some(handle), Some(jobs)) = (self.handle.clone(), self.jobs.as_ref()) else {
            return;
        };

        match jobs.try_send(DispatchJob { handle, message }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(id = %job.message.id, "dispatch queue full; message dropped")
            }
            Err(TrySendError::Closed(job)) => {
                warn!(id = %job.message.id, "dispatch worker gone; message dropped")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch worker
// ─────────────────────────────────────────────────────────────────────────────

/// Run queued messages through `dispatcher` in arrival order, reporting
/// whether each dispatch succeeded.
async fn dispatch_worker<H, D>(
    mut queue: mpsc::Receiver<DispatchJob<H>>,
    done: mpsc::Sender<bool>,
    dispatcher: Arc<D>,
    options: DispatchOptions,
) where
    H: TransportHandle + 'static,
    D: MessageDispatcher + 'static,
{
    while let Some(job) = queue.recv().await {
        let ok = run_job(dispatcher.as_ref(), &job, options).await;
        if done.send(ok).await.is_err() {
            break;
        }
    }
}

async fn run_job<H, D>(dispatcher: &D, job: &DispatchJob<H>, options: DispatchOptions) -> bool
where
    H: TransportHandle + 'static,
    D: MessageDispatcher,
{
    let handle = job.handle.as_ref();
    let message = &job.message;

    if options.auto_read {
        if let Err(e) = bounded(options.timeout, "mark read", handle.mark_read(message)).await {
            debug!(id = %message.id, error = %e, "mark read failed");
        }
    }
    if options.auto_typing {
        let typing = handle.set_typing(&message.chat, true);
        if let Err(e) = bounded(options.timeout, "typing", typing).await {
            debug!(chat = %message.chat, error = %e, "typing indicator failed");
        }
    }

    let ok = match dispatcher.dispatch(handle, message).await {
        Ok(()) => true,
        Err(e) => {
            warn!(id = %message.id, error = %e, "dispatch failed");
            false
        }
    };

    if options.auto_typing {
        let typing = handle.set_typing(&message.chat, false);
        if let Err(e) = bounded(options.timeout, "typing", typing).await {
            debug!(chat = %message.chat, error = %e, "typing indicator failed");
        }
    }
    ok
}

fn already_armed(slot: &TimerSlot) {
    debug!(
        timer = slot.name(),
        remaining_ms = slot.remaining().map(|d| d.as_millis() as u64),
        "timer already armed"
    );
}

/// Next item from `rx`; pends forever without a receiver.
async fn recv_or_pending<V>(rx: &mut Option<mpsc::Receiver<V>>) -> Option<V> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Await `fut` for at most `limit`.
async fn bounded<F, V, E>(limit: Duration, what: &'static str, fut: F) -> Result<V>
where
    F: Future<Output = std::result::Result<V, E>>,
    TetherError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(TetherError::from),
        Err(_) => Err(TetherError::Timeout(what)),
    }
}
