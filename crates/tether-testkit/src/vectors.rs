//! Golden test vectors.
//!
//! Known inputs with the outputs every build must produce: phone-number
//! normalization under the default rules, and disconnect classification
//! under the default markers.

use tether_core::{
    DisconnectCause, DisconnectClassifier, DisconnectReport, MarkerRules, PhoneNumber, PhoneRules,
};

/// A phone-number normalization vector.
#[derive(Debug, Clone)]
pub struct PhoneVector {
    pub name: &'static str,
    pub raw: &'static str,
    /// Normalized digits, or `None` if the input must be rejected.
    pub expected: Option<&'static str>,
}

/// A disconnect classification vector.
#[derive(Debug, Clone)]
pub struct ClassifierVector {
    pub name: &'static str,
    pub status_code: Option<u16>,
    pub reason: &'static str,
    pub expected: DisconnectCause,
}

/// Phone vectors under [`PhoneRules::default`].
pub fn phone_vectors() -> Vec<PhoneVector> {
    vec![
        PhoneVector {
            name: "trunk prefix replaced",
            raw: "0683913716",
            expected: Some("27683913716"),
        },
        PhoneVector {
            name: "bare national number",
            raw: "683913716",
            expected: Some("27683913716"),
        },
        PhoneVector {
            name: "already international",
            raw: "27683913716",
            expected: Some("27683913716"),
        },
        PhoneVector {
            name: "formatted with plus and spaces",
            raw: "+27 68 391 3716",
            expected: Some("27683913716"),
        },
        PhoneVector {
            name: "formatted local",
            raw: "(068) 391-3716",
            expected: Some("27683913716"),
        },
        PhoneVector {
            name: "too short",
            raw: "123",
            expected: None,
        },
        PhoneVector {
            name: "empty",
            raw: "",
            expected: None,
        },
        PhoneVector {
            name: "foreign country code",
            raw: "44683913716",
            expected: None,
        },
    ]
}

/// Classification vectors under [`MarkerRules::default`].
pub fn classifier_vectors() -> Vec<ClassifierVector> {
    vec![
        ClassifierVector {
            name: "logged out status beats text",
            status_code: Some(401),
            reason: "Connection Failure",
            expected: DisconnectCause::LoggedOut,
        },
        ClassifierVector {
            name: "explicit connection failure",
            status_code: None,
            reason: "Connection Failure",
            expected: DisconnectCause::ConnectionFailure,
        },
        ClassifierVector {
            name: "pairing references exhausted",
            status_code: Some(408),
            reason: "QR refs attempts ended",
            expected: DisconnectCause::ConnectionFailure,
        },
        ClassifierVector {
            name: "forbidden in text",
            status_code: Some(500),
            reason: "Request failed: 403",
            expected: DisconnectCause::AuthFailure,
        },
        ClassifierVector {
            name: "unauthorized",
            status_code: None,
            reason: "Unauthorized",
            expected: DisconnectCause::AuthFailure,
        },
        ClassifierVector {
            name: "connection reset",
            status_code: None,
            reason: "read ECONNRESET",
            expected: DisconnectCause::NetworkError,
        },
        ClassifierVector {
            name: "timeout",
            status_code: Some(408),
            reason: "Request timed out",
            expected: DisconnectCause::NetworkError,
        },
        ClassifierVector {
            name: "restart required",
            status_code: Some(515),
            reason: "Stream Errored (restart required)",
            expected: DisconnectCause::Unknown,
        },
        ClassifierVector {
            name: "no information",
            status_code: None,
            reason: "",
            expected: DisconnectCause::Unknown,
        },
    ]
}

/// Check every vector, reporting the first mismatch.
pub fn verify_all_vectors() -> Result<(), String> {
    let rules = PhoneRules::default();
    for vector in phone_vectors() {
        let actual = PhoneNumber::normalize(vector.raw, &rules).ok();
        let actual = actual.as_ref().map(PhoneNumber::as_str);
        if actual != vector.expected {
            return Err(format!(
                "phone vector {:?}: expected {:?}, got {:?}",
                vector.name, vector.expected, actual
            ));
        }
    }

    let markers = MarkerRules::default();
    for vector in classifier_vectors() {
        let actual = markers.classify(&DisconnectReport::new(vector.status_code, vector.reason));
        if actual != vector.expected {
            return Err(format!(
                "classifier vector {:?}: expected {}, got {}",
                vector.name, vector.expected, actual
            ));
        }
    }
    Ok(())
}
