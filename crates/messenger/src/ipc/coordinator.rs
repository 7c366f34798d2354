//! Request Coordinator - request/response over publish/subscribe.
//!
//! ## Flow
//!
//! ```text
//! request()                                              subscriber
//!    │ register(correlation_id) ──▶ PendingRequestStore       │
//!    │ publish(exchange, key, correlation-id, reply-to) ─────▶│
//!    │                                                         │ resolve()/reject()
//!    │           reply listener ◀── publish(reply exchange, reply key)
//!    │                 │ complete(correlation_id)
//!    ◀─────────────────┘ oneshot
//! ```
//!
//! One reply listener serves every request made through a messenger. It is
//! bound to an instance-scoped routing key on a `direct` exchange and is
//! started on first use.

use crate::domain::codec;
use crate::domain::config::MessengerConfig;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{messages, MessengerError, MessengerResult};
use crate::domain::exchange::ExchangeRegistry;
use crate::domain::pending::PendingRequestStore;
use crate::domain::shape::ShapeRef;
use serde_json::Value;
use shared_bus::{SubscriptionId, Transport};
use shared_types::{
    Delivery, ExchangeOptions, Headers, ReplyTo, HEADER_CORRELATION_ID, HEADER_TRACE_ID,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call overrides for `request_with`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the messenger's default timeout.
    pub timeout: Option<Duration>,
    /// Shape the outbound payload must satisfy before it is sent.
    pub request_shape: Option<ShapeRef>,
    /// Shape the reply must satisfy.
    pub response_shape: Option<ShapeRef>,
    /// Trace id to propagate; a fresh one is generated if absent.
    pub trace_id: Option<String>,
}

impl RequestOptions {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn request_shape(mut self, shape: ShapeRef) -> Self {
        self.request_shape = Some(shape);
        self
    }

    #[must_use]
    pub fn response_shape(mut self, shape: ShapeRef) -> Self {
        self.response_shape = Some(shape);
        self
    }

    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

struct ReplyListener {
    id: SubscriptionId,
    task: JoinHandle<()>,
}

/// Removes the pending entry if the caller's future is dropped mid-flight.
/// A no-op once the entry has been completed, expired or rejected.
struct PendingGuard<'a> {
    pending: &'a PendingRequestStore,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(&self.correlation_id);
    }
}

/// Issues requests and routes their replies back to the waiting caller.
pub struct RequestCoordinator {
    transport: Arc<dyn Transport>,
    registry: Arc<ExchangeRegistry>,
    pending: Arc<PendingRequestStore>,
    reply_to: ReplyTo,
    listener: Mutex<Option<ReplyListener>>,
}

impl RequestCoordinator {
    /// Create a coordinator with a fresh reply route.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ExchangeRegistry>,
        config: &MessengerConfig,
    ) -> Self {
        let reply_to = ReplyTo::new(
            config.reply_exchange.clone(),
            format!("{}.{}", config.reply_prefix, Uuid::new_v4().simple()),
        );
        Self {
            transport,
            registry,
            pending: Arc::new(PendingRequestStore::new()),
            reply_to,
            listener: Mutex::new(None),
        }
    }

    /// Where replies for this coordinator are sent.
    pub fn reply_to(&self) -> &ReplyTo {
        &self.reply_to
    }

    /// The correlation table.
    pub fn pending(&self) -> &PendingRequestStore {
        &self.pending
    }

    /// True while the reply listener is running.
    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
    }

    /// Declare the reply exchange on the transport and start the reply
    /// listener if needed.
    pub async fn start(&self) -> MessengerResult<()> {
        let mut listener = self.listener.lock().await;
        if listener
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
        {
            return Ok(());
        }

        // Kept out of the registry so user code cannot publish forged replies.
        self.transport
            .declare_exchange(&self.reply_to.exchange, &ExchangeOptions::direct())
            .await?;
        let raw = self
            .transport
            .subscribe_raw(&self.reply_to.exchange, &self.reply_to.routing_key)
            .await?;

        let task = tokio::spawn(listen(raw.receiver, self.pending.clone()));
        *listener = Some(ReplyListener { id: raw.id, task });

        info!(
            exchange = %self.reply_to.exchange,
            routing_key = %self.reply_to.routing_key,
            "Reply listener started"
        );
        Ok(())
    }

    /// Publish `payload` and wait for the correlated reply.
    ///
    /// # Errors
    ///
    /// - `Exchange` if `exchange` was never declared
    /// - `Validation` if the payload fails `request_shape` or the reply fails `response_shape`
    /// - `Rejected` if the handler rejected the request
    /// - `Timeout` if nothing arrived in time
    /// - `ShuttingDown` if the messenger stopped first
    pub async fn request(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Value,
        options: &RequestOptions,
        default_timeout: Duration,
    ) -> MessengerResult<Value> {
        if !self.registry.contains(exchange) {
            return Err(MessengerError::exchange(messages::INVALID_PUBLISH_EXCHANGE));
        }
        codec::validate(&payload, options.request_shape.as_deref())
            .map_err(|e| MessengerError::validation(messages::INVALID_PAYLOAD_TYPE, e))?;
        let body = codec::encode(&payload)?;

        self.start().await?;

        let timeout = options.timeout.unwrap_or(default_timeout);
        let (correlation_id, mut rx) =
            self.pending
                .register(routing_key, timeout, options.response_shape.clone());
        let _guard = PendingGuard {
            pending: &self.pending,
            correlation_id,
        };

        let trace_id = options
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID.to_string(), correlation_id.to_string());
        headers.insert(HEADER_TRACE_ID.to_string(), trace_id);
        self.reply_to.write_headers(&mut headers);

        let routed = self
            .transport
            .publish_raw(exchange, routing_key, body, headers)
            .await?;
        debug!(
            correlation_id = %correlation_id,
            exchange = exchange,
            routing_key = routing_key,
            routed = routed,
            "Request published"
        );

        let received = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                if self.pending.expire(&correlation_id) {
                    return Err(MessengerError::Timeout);
                }
                // A reply won the race with the deadline.
                rx.await
            }
        };

        // Sender dropped without an outcome: the entry was torn down under us.
        received.unwrap_or(Err(MessengerError::ShuttingDown))
    }

    /// Stop the reply listener and fail every outstanding request.
    ///
    /// Returns the number of requests failed. The listener restarts on the
    /// next request.
    pub async fn shutdown(&self) -> usize {
        if let Some(listener) = self.listener.lock().await.take() {
            if let Err(e) = self.transport.unsubscribe(listener.id).await {
                debug!(error = %e, "Reply binding already gone");
            }
            listener.task.abort();
            info!(routing_key = %self.reply_to.routing_key, "Reply listener stopped");
        }
        self.pending.reject_all()
    }
}

async fn listen(mut receiver: mpsc::Receiver<Delivery>, pending: Arc<PendingRequestStore>) {
    while let Some(delivery) = receiver.recv().await {
        route_reply(&delivery, &pending);
    }
    debug!("Reply channel closed");
}

fn route_reply(delivery: &Delivery, pending: &PendingRequestStore) {
    let Some(raw) = delivery.correlation_id() else {
        warn!(routing_key = %delivery.routing_key, "Reply without correlation id dropped");
        return;
    };
    match CorrelationId::parse(raw) {
        Ok(correlation_id) => {
            pending.complete(correlation_id, delivery.reply_status(), &delivery.body);
        }
        Err(e) => {
            warn!(correlation_id = raw, error = %e, "Reply with malformed correlation id dropped");
        }
    }
}
