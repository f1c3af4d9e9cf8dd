//! Pairing-code authentication.
//!
//! The [`PairingController`] owns the normalized phone number and the table
//! of pending pairing requests. The lifecycle decides *when* to request a
//! code and how many attempts remain; this module issues the request, keeps
//! at most one request pending, and shows the code to the operator.
//!
//! Codes are shown on the operator console only, never sent over the
//! messaging network.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tether_core::{CoreError, PairingCode, PendingTable, PhoneNumber};
use tether_transport::TransportHandle;

use crate::error::{Result, TetherError};
use crate::settings::PairingPolicy;

/// A pairing request between issuance and resolution.
#[derive(Debug, Clone)]
pub struct PendingPairing {
    pub phone: PhoneNumber,
    pub attempt: u32,
    pub requested_at: std::time::Instant,
    /// Set once the transport returned a code.
    pub code: Option<PairingCode>,
}

/// What the operator sees for one issued code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingNotice {
    pub code: PairingCode,
    pub phone: PhoneNumber,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl fmt::Display for PairingNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "================ PAIRING CODE ================")?;
        writeln!(f, "  Code:     {}", self.code)?;
        writeln!(f, "  Number:   {}", self.phone)?;
        writeln!(f, "  Attempt:  {}/{}", self.attempt, self.max_attempts)?;
        writeln!(f)?;
        writeln!(f, "  1. Open the messaging app on the phone above")?;
        writeln!(f, "  2. Go to Settings > Linked devices")?;
        writeln!(f, "  3. Tap \"Link a device\"")?;
        writeln!(f, "  4. Choose \"Link with phone number instead\"")?;
        writeln!(f, "  5. Enter the code")?;
        write!(f, "==============================================")
    }
}

/// Operator-facing output.
pub trait OperatorConsole: Send + Sync {
    /// Show a freshly issued pairing code.
    fn show_pairing_code(&self, notice: &PairingNotice);

    /// The account was logged out and needs manual attention.
    fn show_logged_out(&self, fingerprint: Option<&str>);
}

/// Prints to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl OperatorConsole for StdoutConsole {
    fn show_pairing_code(&self, notice: &PairingNotice) {
        println!("\n{}\n", notice);
    }

    fn show_logged_out(&self, fingerprint: Option<&str>) {
        println!(
            "\nLogged out (session {}). The session was left in place; \
             remove it and restart to pair again.\n",
            fingerprint.unwrap_or("unknown")
        );
    }
}

/// Drives the pairing-code exchange for one phone number.
pub struct PairingController {
    phone: PhoneNumber,
    max_attempts: u32,
    timeout: Duration,
    pending: PendingTable<PhoneNumber, PendingPairing>,
    console: Arc<dyn OperatorConsole>,
}

impl PairingController {
    /// Normalize `raw_phone` and build the controller.
    ///
    /// A malformed number fails here with `ConfigInvalid`.
    pub fn new(
        raw_phone: &str,
        policy: &PairingPolicy,
        max_attempts: u32,
        timeout: Duration,
        console: Arc<dyn OperatorConsole>,
    ) -> std::result::Result<Self, CoreError> {
        let phone = PhoneNumber::normalize(raw_phone, &policy.phone_rules)?;
        Ok(Self {
            phone,
            max_attempts,
            timeout,
            pending: PendingTable::new(policy.code_ttl),
            console,
        })
    }

    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    /// Replace where codes and logout notices are shown.
    pub fn set_console(&mut self, console: Arc<dyn OperatorConsole>) {
        self.console = console;
    }

    /// Whether a request is pending and unexpired.
    pub fn is_pending(&self) -> bool {
        self.pending.has_live(now())
    }

    /// Request a code on `handle` and show it to the operator.
    ///
    /// Fails with [`TetherError::PairingInProgress`] while another request
    /// is pending. A failed request leaves nothing pending.
    pub async fn request<H>(&mut self, handle: &H, attempt: u32) -> Result<PairingCode>
    where
        H: TransportHandle + ?Sized,
    {
        let requested_at = now();
        self.pending.purge(requested_at);
        let entry = PendingPairing {
            phone: self.phone.clone(),
            attempt,
            requested_at,
            code: None,
        };
        if !self.pending.try_insert(self.phone.clone(), entry, requested_at) {
            return Err(TetherError::PairingInProgress);
        }

        info!(
            phone = %self.phone,
            attempt,
            max = self.max_attempts,
            "requesting pairing code"
        );

        let result = tokio::time::timeout(self.timeout, handle.request_pairing_code(&self.phone))
            .await
            .map_err(|_| TetherError::Timeout("pairing code request"))
            .and_then(|r| r.map_err(TetherError::from));

        match result {
            Ok(code) => {
                let notice = PairingNotice {
                    code: code.clone(),
                    phone: self.phone.clone(),
                    attempt,
                    max_attempts: self.max_attempts,
                };
                self.pending.take(&self.phone, now());
                self.pending.try_insert(
                    self.phone.clone(),
                    PendingPairing {
                        phone: self.phone.clone(),
                        attempt,
                        requested_at,
                        code: Some(code.clone()),
                    },
                    requested_at,
                );
                self.console.show_pairing_code(&notice);
                info!(attempt, "pairing code issued");
                Ok(code)
            }
            Err(e) => {
                self.pending.take(&self.phone, now());
                warn!(attempt, error = %e, "pairing code request failed");
                Err(e)
            }
        }
    }

    /// The handshake completed; the pending request is done.
    pub fn resolve(&mut self) -> Option<PendingPairing> {
        self.pending.take(&self.phone, now())
    }

    /// Drop any pending request.
    pub fn abandon(&mut self) {
        self.pending.clear();
    }

    /// Tell the operator the session was logged out.
    pub fn report_logged_out(&self, fingerprint: Option<&str>) {
        self.console.show_logged_out(fingerprint);
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
