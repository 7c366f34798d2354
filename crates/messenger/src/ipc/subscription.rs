//! Subscription manager.
//!
//! Each subscription owns one transport binding and one dispatcher task.
//! The dispatcher decodes and validates every delivery, then runs the
//! handler in a task of its own so a slow or panicking handler never stalls
//! the binding.

use crate::domain::codec;
use crate::domain::error::{messages, ErrorEvent, MessengerError, MessengerResult};
use crate::domain::exchange::ExchangeRegistry;
use crate::domain::shape::ShapeRef;
use crate::ipc::context::MessageContext;
use crate::ipc::handler::MessageHandler;
use dashmap::DashMap;
use serde_json::Value;
use shared_bus::{SubscriptionId, Transport};
use shared_types::Delivery;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn, Instrument};

type Tracked = DashMap<SubscriptionId, Subscription>;

struct SubscriptionInner {
    id: SubscriptionId,
    exchange: String,
    pattern: String,
    active: AtomicBool,
    stop: Notify,
    transport: Arc<dyn Transport>,
    tracked: Weak<Tracked>,
}

/// Handle to a live subscription.
///
/// Clones refer to the same subscription. Disposing any clone stops
/// delivery for all of them.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    fn new(
        id: SubscriptionId,
        exchange: &str,
        pattern: &str,
        transport: Arc<dyn Transport>,
        tracked: Weak<Tracked>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id,
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
                active: AtomicBool::new(true),
                stop: Notify::new(),
                transport,
                tracked,
            }),
        }
    }

    /// Transport binding id.
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Exchange the subscription is bound to.
    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Routing pattern the subscription was created with.
    pub fn pattern(&self) -> &str {
        &self.inner.pattern
    }

    /// False once disposed.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop delivery and release the transport binding.
    ///
    /// Idempotent. Messages already handed to a handler task still finish.
    pub async fn dispose(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.notify_one();
        if let Some(tracked) = self.inner.tracked.upgrade() {
            tracked.remove(&self.inner.id);
        }

        if let Err(e) = self.inner.transport.unsubscribe(self.inner.id).await {
            debug!(subscription = %self.inner.id, error = %e, "Binding already gone on dispose");
        }
        debug!(
            subscription = %self.inner.id,
            exchange = %self.inner.exchange,
            pattern = %self.inner.pattern,
            "Subscription disposed"
        );
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("exchange", &self.inner.exchange)
            .field("pattern", &self.inner.pattern)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Creates subscriptions and tracks the live ones.
pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
    registry: Arc<ExchangeRegistry>,
    subscriptions: Arc<Tracked>,
}

impl SubscriptionManager {
    /// Create a manager over a transport and the messenger's exchange registry.
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<ExchangeRegistry>) -> Self {
        Self {
            transport,
            registry,
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    /// Bind `handler` to messages on `exchange` whose routing key matches `pattern`.
    ///
    /// With a shape, payloads that fail validation never reach the handler:
    /// requests are rejected with "Invalid Request Type.", plain messages
    /// are dropped.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        exchange: &str,
        pattern: &str,
        handler: H,
        shape: Option<ShapeRef>,
    ) -> MessengerResult<Subscription> {
        if !self.registry.contains(exchange) {
            return Err(MessengerError::exchange(messages::INVALID_SUBSCRIPTION_EXCHANGE));
        }

        let raw = self.transport.subscribe_raw(exchange, pattern).await?;
        let subscription = Subscription::new(
            raw.id,
            exchange,
            pattern,
            self.transport.clone(),
            Arc::downgrade(&self.subscriptions),
        );
        self.subscriptions.insert(raw.id, subscription.clone());

        let dispatcher = Dispatcher {
            subscription: subscription.clone(),
            handler: Arc::new(handler),
            shape,
            transport: self.transport.clone(),
        };
        tokio::spawn(dispatcher.run(raw.receiver));

        debug!(
            subscription = %raw.id,
            exchange = exchange,
            pattern = pattern,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Number of subscriptions not yet disposed.
    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Dispose every tracked subscription. Returns how many were live.
    pub async fn dispose_all(&self) -> usize {
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.subscriptions.clear();

        let mut disposed = 0;
        for subscription in subscriptions {
            if subscription.is_active() {
                subscription.dispose().await;
                disposed += 1;
            }
        }
        disposed
    }
}

struct Dispatcher {
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    shape: Option<ShapeRef>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<Delivery>) {
        loop {
            tokio::select! {
                biased;
                _ = self.subscription.inner.stop.notified() => break,
                delivery = receiver.recv() => match delivery {
                    Some(delivery) if self.subscription.is_active() => self.dispatch(delivery),
                    _ => break,
                },
            }
        }
        // The binding may have been closed under us; release it either way.
        self.subscription.dispose().await;
        debug!(subscription = %self.subscription.id(), "Dispatcher stopped");
    }

    fn dispatch(&self, delivery: Delivery) {
        let context = MessageContext::from_delivery(&delivery, self.transport.clone());
        let span = tracing::debug_span!(
            "message",
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            trace_id = context.trace_id().unwrap_or_default(),
        );

        let payload = codec::decode(&delivery.body).and_then(|payload| {
            codec::validate(&payload, self.shape.as_deref()).map(|()| payload)
        });

        match payload {
            Ok(payload) => {
                tokio::spawn(run_handler(self.handler.clone(), payload, context).instrument(span));
            }
            Err(reason) if context.is_request() => {
                tokio::spawn(
                    async move {
                        debug!(reason = %reason, "Rejecting request that failed validation");
                        if let Err(e) = context.reject(ErrorEvent::invalid_request(&reason)).await {
                            warn!(error = %e, "Failed to send validation rejection");
                        }
                    }
                    .instrument(span),
                );
            }
            Err(reason) => {
                let _entered = span.enter();
                warn!(reason = %reason, "Dropping message that failed validation");
            }
        }
    }
}

async fn run_handler(handler: Arc<dyn MessageHandler>, payload: Value, context: MessageContext) {
    let handler_context = context.clone();
    let outcome = tokio::spawn(
        async move { handler.handle(payload, handler_context).await }.in_current_span(),
    )
    .await;

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => ErrorEvent::from(e),
        Err(join_error) if join_error.is_panic() => {
            ErrorEvent::new(panic_message(join_error.into_panic())).with_name("Panic")
        }
        Err(_) => return,
    };

    if !context.is_request() {
        error!(error = %failure, "Subscription handler failed");
        return;
    }
    if context.has_replied() {
        warn!(error = %failure, "Handler failed after replying; error not sent");
        return;
    }
    if let Err(e) = context.reject(failure).await {
        warn!(error = %e, "Failed to send handler error to requester");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
