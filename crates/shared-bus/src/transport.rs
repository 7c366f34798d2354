//! # Transport Port
//!
//! The publish/subscribe primitive the messenger is built on. Connection
//! handling, framing, acknowledgement and persistence belong to the
//! implementation; the messenger only sees these four operations.

use async_trait::async_trait;
use shared_types::{Delivery, ExchangeOptions, Headers, TransportError};
use std::fmt;
use tokio::sync::mpsc;

/// Identifier of a raw transport subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live binding: its id plus the channel deliveries arrive on.
///
/// The channel closes when the binding is removed from the transport.
#[derive(Debug)]
pub struct RawSubscription {
    /// Binding id, used to unsubscribe.
    pub id: SubscriptionId,
    /// Deliveries routed to this binding.
    pub receiver: mpsc::Receiver<Delivery>,
}

/// Publish/subscribe transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declare an exchange. Re-declaring with the same kind succeeds.
    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), TransportError>;

    /// Publish an encoded message.
    ///
    /// # Returns
    ///
    /// The number of bindings the message was routed to. Zero is not an
    /// error: the message was accepted but nobody was listening.
    async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<usize, TransportError>;

    /// Bind to an exchange with a routing pattern.
    async fn subscribe_raw(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> Result<RawSubscription, TransportError>;

    /// Remove a binding.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}
