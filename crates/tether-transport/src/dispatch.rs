//! The seam to the command layer.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::AccountId;

use crate::error::Result;
use crate::event::InboundMessage;
use crate::transport::TransportHandle;

/// Receives lifecycle notifications and inbound messages.
///
/// The controller calls `dispatch` only while the connection is open, never
/// for messages sent by this account, and at most once per message id.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// The connection reached the open state as `account`.
    async fn on_ready(&self, handle: &dyn TransportHandle, account: &AccountId) -> Result<()>;

    /// Handle one inbound message.
    async fn dispatch(&self, handle: &dyn TransportHandle, message: &InboundMessage) -> Result<()>;
}

#[async_trait]
impl<D: MessageDispatcher + ?Sized> MessageDispatcher for Arc<D> {
    async fn on_ready(&self, handle: &dyn TransportHandle, account: &AccountId) -> Result<()> {
        (**self).on_ready(handle, account).await
    }

    async fn dispatch(&self, handle: &dyn TransportHandle, message: &InboundMessage) -> Result<()> {
        (**self).dispatch(handle, message).await
    }
}
