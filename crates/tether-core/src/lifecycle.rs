//! Connection lifecycle state machine.
//!
//! Every decision of the connection controller lives here as a pure
//! function: [`Lifecycle::step`] takes the current lifecycle and one event
//! and returns the next lifecycle plus the effects the controller must carry
//! out. The controller owns timers, the transport and the store; this
//! module owns the rules.
//!
//! ## Timer guard
//!
//! The lifecycle records whether a reconnect timer and a pairing-retry timer
//! are armed. A step never emits a schedule effect for a purpose whose timer
//! is already armed, so at most one timer per purpose is ever outstanding.

use std::fmt;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::disconnect::DisconnectCause;
use crate::error::FailureKind;

/// Connection state. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    AwaitingPairing,
    Open,
    ClosedRetryable,
    ClosedTerminal,
}

impl ConnectionState {
    /// Whether a transport handle is live in this state.
    pub fn has_transport(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing | ConnectionState::Open
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::ClosedTerminal)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing => "awaiting_pairing",
            ConnectionState::Open => "open",
            ConnectionState::ClosedRetryable => "closed_retryable",
            ConnectionState::ClosedTerminal => "closed_terminal",
        };
        f.write_str(s)
    }
}

/// Bounded retry counters, reset on every transition into `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryCounters {
    pub pairing_attempts: u32,
    pub connection_attempts: u32,
}

impl RetryCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Limits and delays for the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Generic disconnects tolerated before the session is wiped.
    pub max_connection_attempts: u32,
    /// Pairing-code requests per cycle.
    pub max_pairing_attempts: u32,
    /// Delay schedule for generic disconnects.
    pub reconnect: BackoffPolicy,
    /// Delay schedule for failed pairing requests.
    pub pairing_retry: BackoffPolicy,
    /// Fixed delay before reconnecting with a wiped session.
    pub fresh_session_delay: Duration,
    /// Wait after pairing attempts are exhausted.
    pub pairing_cooldown: Duration,
    /// Treat network-marker disconnects as needing fresh credentials.
    pub network_errors_clear_session: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            max_connection_attempts: 5,
            max_pairing_attempts: 3,
            reconnect: BackoffPolicy::new(
                Duration::from_secs(3),
                Duration::from_secs(2),
                Duration::from_secs(30),
            ),
            pairing_retry: BackoffPolicy::multiplicative(
                Duration::from_secs(5),
                Duration::from_secs(30),
            ),
            fresh_session_delay: Duration::from_secs(3),
            pairing_cooldown: Duration::from_secs(60),
            network_errors_clear_session: true,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Process start.
    Start,
    /// The reconnect timer fired.
    ReconnectDue,
    /// The transport completed an authenticated handshake.
    HandshakeComplete,
    /// The transport has no valid credentials; pairing is needed.
    PairingRequired,
    /// A pairing code was issued and shown to the operator.
    PairingIssued,
    /// A pairing-code request failed.
    PairingFailed,
    /// The pairing-retry timer fired.
    PairingRetryDue,
    /// The connection closed, or could not be opened.
    Disconnected(DisconnectCause),
    /// Graceful shutdown requested.
    Shutdown,
}

/// Work the controller must perform, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Load the session and open a transport handle.
    OpenTransport,
    /// Drop the handle of a connection that already closed.
    ReleaseTransport,
    /// Actively close the live handle (shutdown only).
    CloseTransport,
    ScheduleReconnect(Duration),
    CancelReconnect,
    SchedulePairingRetry(Duration),
    CancelPairingRetry,
    /// Ask the transport for a pairing code.
    RequestPairing { attempt: u32 },
    /// Wipe persisted credentials.
    ClearSession(FailureKind),
    /// Tell the dispatcher the connection is ready.
    NotifyReady,
    /// Surface a terminal logout for manual intervention.
    ReportTerminal,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Lifecycle,
    pub effects: Vec<Effect>,
}

/// The complete lifecycle snapshot the rules operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub state: ConnectionState,
    pub counters: RetryCounters,
    /// A reconnect timer is outstanding.
    pub reconnect_armed: bool,
    /// A pairing-retry timer is outstanding.
    pub pairing_retry_armed: bool,
    /// A pairing-code request has been issued and not yet resolved.
    pub pairing_in_flight: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    pub fn step(&self, event: LifecycleEvent, policy: &LifecyclePolicy) -> Transition {
        let mut next = *self;
        let mut effects = Vec::new();

        match event {
            LifecycleEvent::Start => {
                if next.state == ConnectionState::Idle {
                    next.state = ConnectionState::Connecting;
                    effects.push(Effect::OpenTransport);
                }
            }

            LifecycleEvent::ReconnectDue => {
                next.reconnect_armed = false;
                if matches!(
                    next.state,
                    ConnectionState::ClosedRetryable | ConnectionState::Idle
                ) {
                    next.state = ConnectionState::Connecting;
                    effects.push(Effect::OpenTransport);
                }
            }

            LifecycleEvent::HandshakeComplete => {
                if matches!(
                    next.state,
                    ConnectionState::Connecting | ConnectionState::AwaitingPairing
                ) {
                    next.state = ConnectionState::Open;
                    next.counters.reset();
                    next.pairing_in_flight = false;
                    next.cancel_pairing_retry(&mut effects);
                    effects.push(Effect::NotifyReady);
                }
            }

            LifecycleEvent::PairingRequired => {
                if next.state == ConnectionState::Connecting {
                    next.state = ConnectionState::AwaitingPairing;
                    next.begin_pairing(policy, &mut effects);
                }
            }

            LifecycleEvent::PairingIssued => {
                next.pairing_in_flight = false;
            }

            LifecycleEvent::PairingFailed => {
                next.pairing_in_flight = false;
                if next.state == ConnectionState::AwaitingPairing && !next.pairing_retry_armed {
                    if next.counters.pairing_attempts < policy.max_pairing_attempts {
                        next.pairing_retry_armed = true;
                        effects.push(Effect::SchedulePairingRetry(
                            policy.pairing_retry.delay(next.counters.pairing_attempts),
                        ));
                    } else {
                        next.exhaust_pairing(policy, &mut effects);
                    }
                }
            }

            LifecycleEvent::PairingRetryDue => {
                next.pairing_retry_armed = false;
                if next.state == ConnectionState::AwaitingPairing {
                    next.begin_pairing(policy, &mut effects);
                }
            }

            LifecycleEvent::Disconnected(cause) => {
                if next.state.has_transport() {
                    next.on_disconnect(cause, policy, &mut effects);
                }
            }

            LifecycleEvent::Shutdown => {
                next.cancel_pairing_retry(&mut effects);
                if next.reconnect_armed {
                    next.reconnect_armed = false;
                    effects.push(Effect::CancelReconnect);
                }
                if next.state.has_transport() {
                    effects.push(Effect::CloseTransport);
                }
                next.pairing_in_flight = false;
                next.state = ConnectionState::Idle;
            }
        }

        Transition { next, effects }
    }

    fn begin_pairing(&mut self, policy: &LifecyclePolicy, effects: &mut Vec<Effect>) {
        if self.pairing_in_flight || self.pairing_retry_armed {
            return;
        }
        if self.counters.pairing_attempts >= policy.max_pairing_attempts {
            self.exhaust_pairing(policy, effects);
            return;
        }
        self.counters.pairing_attempts += 1;
        self.pairing_in_flight = true;
        effects.push(Effect::RequestPairing {
            attempt: self.counters.pairing_attempts,
        });
    }

    fn exhaust_pairing(&mut self, policy: &LifecyclePolicy, effects: &mut Vec<Effect>) {
        self.cancel_pairing_retry(effects);
        self.pairing_in_flight = false;
        self.counters.pairing_attempts = 0;
        self.state = ConnectionState::ClosedRetryable;
        effects.push(Effect::ReleaseTransport);
        effects.push(Effect::ClearSession(FailureKind::RetryLimitExceeded));
        self.schedule_reconnect(policy.pairing_cooldown, effects);
    }

    fn on_disconnect(
        &mut self,
        cause: DisconnectCause,
        policy: &LifecyclePolicy,
        effects: &mut Vec<Effect>,
    ) {
        self.cancel_pairing_retry(effects);
        self.pairing_in_flight = false;
        effects.push(Effect::ReleaseTransport);

        let fresh_session = match cause {
            DisconnectCause::LoggedOut => {
                self.state = ConnectionState::ClosedTerminal;
                if self.reconnect_armed {
                    self.reconnect_armed = false;
                    effects.push(Effect::CancelReconnect);
                }
                effects.push(Effect::ReportTerminal);
                return;
            }
            DisconnectCause::AuthFailure | DisconnectCause::ConnectionFailure => true,
            DisconnectCause::NetworkError => policy.network_errors_clear_session,
            DisconnectCause::Unknown => false,
        };

        self.state = ConnectionState::ClosedRetryable;

        if fresh_session {
            self.counters.reset();
            effects.push(Effect::ClearSession(FailureKind::AuthInvalid));
            self.schedule_reconnect(policy.fresh_session_delay, effects);
            return;
        }

        self.counters.connection_attempts += 1;
        let delay = policy.reconnect.delay(self.counters.connection_attempts);
        if self.counters.connection_attempts >= policy.max_connection_attempts {
            self.counters.reset();
            effects.push(Effect::ClearSession(FailureKind::RetryLimitExceeded));
        }
        self.schedule_reconnect(delay, effects);
    }

    fn schedule_reconnect(&mut self, delay: Duration, effects: &mut Vec<Effect>) {
        if !self.reconnect_armed {
            self.reconnect_armed = true;
            effects.push(Effect::ScheduleReconnect(delay));
        }
    }

    fn cancel_pairing_retry(&mut self, effects: &mut Vec<Effect>) {
        if self.pairing_retry_armed {
            self.pairing_retry_armed = false;
            effects.push(Effect::CancelPairingRetry);
        }
    }
}
