//! Dispatchers shipped with Tether.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use tether_core::AccountId;
use tether_transport::{InboundMessage, MessageDispatcher, Result, TransportHandle};

/// Sends a one-time "online" notice to the owner, then delegates.
///
/// The notice goes out on the first ready connection only. If sending it
/// fails, the next ready connection tries again.
pub struct ReadyNotifier<D> {
    inner: D,
    owner: Option<String>,
    bot_name: String,
    sent: AtomicBool,
}

impl<D: MessageDispatcher> ReadyNotifier<D> {
    pub fn new(inner: D, owner: Option<String>, bot_name: impl Into<String>) -> Self {
        Self {
            inner,
            owner,
            bot_name: bot_name.into(),
            sent: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Whether the notice has been delivered.
    pub fn notified(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: MessageDispatcher> MessageDispatcher for ReadyNotifier<D> {
    async fn on_ready(&self, handle: &dyn TransportHandle, account: &AccountId) -> Result<()> {
        if let Some(owner) = self.owner.as_deref() {
            if !self.sent.swap(true, Ordering::SeqCst) {
                let notice = format!("{} is online", self.bot_name);
                match handle.send_text(owner, &notice).await {
                    Ok(()) => info!(owner, "ready notice sent"),
                    Err(e) => {
                        self.sent.store(false, Ordering::SeqCst);
                        warn!(owner, error = %e, "ready notice failed");
                    }
                }
            }
        }
        self.inner.on_ready(handle, account).await
    }

    async fn dispatch(&self, handle: &dyn TransportHandle, message: &InboundMessage) -> Result<()> {
        self.inner.dispatch(handle, message).await
    }
}

/// Logs every message and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl MessageDispatcher for LogDispatcher {
    async fn on_ready(&self, _handle: &dyn TransportHandle, account: &AccountId) -> Result<()> {
        info!(account = %account, "ready");
        Ok(())
    }

    async fn dispatch(&self, _handle: &dyn TransportHandle, message: &InboundMessage) -> Result<()> {
        info!(
            id = %message.id,
            chat = %message.chat,
            sender = %message.sender,
            text = message.text.as_deref().unwrap_or(""),
            "message received"
        );
        Ok(())
    }
}
