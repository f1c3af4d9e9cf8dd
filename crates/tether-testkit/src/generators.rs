//! Proptest generators for property-based testing.

use std::time::Duration;

use proptest::prelude::*;

use tether_core::{
    BackoffPolicy, DisconnectCause, DisconnectReport, LifecycleEvent, LOGGED_OUT_STATUS,
};

/// Generate a DisconnectCause.
pub fn disconnect_cause() -> impl Strategy<Value = DisconnectCause> {
    prop_oneof![
        Just(DisconnectCause::LoggedOut),
        Just(DisconnectCause::AuthFailure),
        Just(DisconnectCause::ConnectionFailure),
        Just(DisconnectCause::NetworkError),
        Just(DisconnectCause::Unknown),
    ]
}

/// Generate any lifecycle event. Generic drops are weighted up, since they
/// are the ones that accumulate attempts.
pub fn lifecycle_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        1 => Just(LifecycleEvent::Start),
        2 => Just(LifecycleEvent::ReconnectDue),
        2 => Just(LifecycleEvent::HandshakeComplete),
        2 => Just(LifecycleEvent::PairingRequired),
        1 => Just(LifecycleEvent::PairingIssued),
        2 => Just(LifecycleEvent::PairingFailed),
        2 => Just(LifecycleEvent::PairingRetryDue),
        3 => Just(LifecycleEvent::Disconnected(DisconnectCause::Unknown)),
        2 => disconnect_cause().prop_map(LifecycleEvent::Disconnected),
        1 => Just(LifecycleEvent::Shutdown),
    ]
}

/// Generate a sequence of up to `max_len` lifecycle events.
pub fn lifecycle_events(max_len: usize) -> impl Strategy<Value = Vec<LifecycleEvent>> {
    prop::collection::vec(lifecycle_event(), 0..=max_len)
}

/// Generate the reason text of a disconnect, mixing known markers with noise.
pub fn reason() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Connection Failure".to_string()),
        Just("QR refs attempts ended".to_string()),
        Just("Request failed with status 403".to_string()),
        Just("Unauthorized".to_string()),
        Just("read ECONNRESET".to_string()),
        Just("Request timed out".to_string()),
        Just("Stream Errored (restart required)".to_string()),
        "[a-z ]{0,24}",
    ]
}

/// Generate a disconnect report, sometimes with the logged-out status.
pub fn disconnect_report() -> impl Strategy<Value = DisconnectReport> {
    let status = prop_oneof![
        Just(None),
        Just(Some(LOGGED_OUT_STATUS)),
        (400u16..600).prop_map(Some),
    ];
    (status, reason()).prop_map(|(status, reason)| DisconnectReport::new(status, reason))
}

/// Generate a backoff policy with second-granularity constants.
pub fn backoff_policy() -> impl Strategy<Value = BackoffPolicy> {
    (0u64..60, 0u64..30, 0u64..300).prop_map(|(base, step, cap)| {
        BackoffPolicy::new(
            Duration::from_secs(base),
            Duration::from_secs(step),
            Duration::from_secs(cap),
        )
    })
}

/// Generate a string of digits and separators that may or may not be a
/// valid phone number.
pub fn raw_phone() -> impl Strategy<Value = String> {
    "[0-9 +()-]{0,16}"
}
