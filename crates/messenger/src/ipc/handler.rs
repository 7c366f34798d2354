//! Subscription handler trait.

use crate::ipc::context::MessageContext;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Handles messages delivered to a subscription.
///
/// Returning `Err` (or panicking) while handling a request sends an
/// `ErrorEvent` back to the requester unless the handler already replied.
/// For plain messages the error is logged and the subscription keeps going.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one decoded payload.
    async fn handle(&self, payload: Value, message: MessageContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Value, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Value, message: MessageContext) -> anyhow::Result<()> {
        (self)(payload, message).await
    }
}
