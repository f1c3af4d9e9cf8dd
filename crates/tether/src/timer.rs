//! Single-shot deadline slots polled from the controller's select loop.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// One named timer purpose.
///
/// A slot holds at most one deadline and refuses to arm while armed.
/// [`TimerSlot::fired`] is cancel-safe: dropping the future leaves the
/// deadline in place.
#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    deadline: Option<Instant>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            deadline: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arm the slot to fire after `delay`. Returns `false` if already armed.
    pub fn arm(&mut self, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + delay);
        true
    }

    /// Disarm the slot. Returns whether it was armed.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Complete when the deadline passes, disarming the slot.
    ///
    /// Never completes while disarmed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
