//! Phone number normalization for pairing requests.
//!
//! The network wants international format without a leading `+`:
//! country code followed by the national significant number. A malformed
//! number is rejected here and never reaches the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Normalization rules for one target network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneRules {
    /// Country calling code, digits only.
    pub country_code: String,
    /// National trunk prefix dialed before local numbers.
    pub trunk_prefix: String,
    /// Digits in the national significant number.
    pub national_len: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            country_code: "27".into(),
            trunk_prefix: "0".into(),
            national_len: 9,
        }
    }
}

/// A phone number in normalized international format.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize `raw` under `rules`.
    ///
    /// Non-digits are stripped first. A trunk-prefixed national number has the
    /// prefix replaced by the country code; a bare national number gets the
    /// country code prepended; an already international number is kept. The
    /// result must be exactly `country_code` + `national_len` digits.
    pub fn normalize(raw: &str, rules: &PhoneRules) -> Result<Self, CoreError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let expected_len = rules.country_code.len() + rules.national_len;

        let candidate = if digits.len() == expected_len && digits.starts_with(&rules.country_code)
        {
            digits
        } else if digits.len() == rules.trunk_prefix.len() + rules.national_len
            && !rules.trunk_prefix.is_empty()
            && digits.starts_with(&rules.trunk_prefix)
        {
            format!("{}{}", rules.country_code, &digits[rules.trunk_prefix.len()..])
        } else if digits.len() == rules.national_len {
            format!("{}{}", rules.country_code, digits)
        } else {
            digits
        };

        if candidate.len() != expected_len || !candidate.starts_with(&rules.country_code) {
            return Err(CoreError::ConfigInvalid(format!(
                "phone number {:?} does not normalize to +{} followed by {} digits",
                raw, rules.country_code, rules.national_len
            )));
        }

        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhoneNumber({})", self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}
