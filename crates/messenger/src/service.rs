//! Messenger service - the public surface.
//!
//! Combines the exchange registry, subscription manager and request
//! coordinator over one shared transport.

use crate::domain::codec;
use crate::domain::config::MessengerConfig;
use crate::domain::error::{messages, MessengerError, MessengerResult};
use crate::domain::exchange::{Exchange, ExchangeRegistry};
use crate::domain::pending::PendingStats;
use crate::domain::shape::{Shape, ShapeRef};
use crate::ipc::coordinator::{RequestCoordinator, RequestOptions};
use crate::ipc::handler::MessageHandler;
use crate::ipc::subscription::{Subscription, SubscriptionManager};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use shared_bus::Transport;
use shared_types::{
    ExchangeOptions, Headers, HEADER_CORRELATION_ID, HEADER_REPLY_EXCHANGE, HEADER_REPLY_STATUS,
    HEADER_REPLY_TO, HEADER_TRACE_ID,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Headers the messenger owns; callers cannot set them through `PublishOptions`.
const RESERVED_HEADERS: [&str; 5] = [
    HEADER_CORRELATION_ID,
    HEADER_REPLY_TO,
    HEADER_REPLY_EXCHANGE,
    HEADER_REPLY_STATUS,
    HEADER_TRACE_ID,
];

/// Per-call options for `publish_with`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Shape the payload must satisfy before it is sent.
    pub shape: Option<ShapeRef>,
    /// Trace id to propagate; a fresh one is generated if absent.
    pub trace_id: Option<String>,
    /// Extra application headers.
    pub headers: Headers,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shape(mut self, shape: ShapeRef) -> Self {
        self.shape = Some(shape);
        self
    }

    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Messaging facade over a publish/subscribe transport.
///
/// Cheap operations are synchronous; everything that touches the transport
/// is async. One instance is meant to be shared (`Arc<Messenger>`) by every
/// caller in a process.
pub struct Messenger {
    config: MessengerConfig,
    timeout: RwLock<Duration>,
    transport: Arc<dyn Transport>,
    registry: Arc<ExchangeRegistry>,
    subscriptions: SubscriptionManager,
    coordinator: RequestCoordinator,
}

impl Messenger {
    /// Create a messenger over `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: MessengerConfig) -> MessengerResult<Self> {
        config
            .validate()
            .map_err(|e| MessengerError::configuration(e.to_string()))?;
        Ok(Self::assemble(transport, config))
    }

    /// Create a messenger with the default configuration.
    pub fn with_defaults(transport: Arc<dyn Transport>) -> Self {
        Self::assemble(transport, MessengerConfig::default())
    }

    fn assemble(transport: Arc<dyn Transport>, config: MessengerConfig) -> Self {
        let registry = Arc::new(ExchangeRegistry::with_reserved(
            Arc::clone(&transport),
            config.reply_exchange.clone(),
        ));
        let subscriptions = SubscriptionManager::new(Arc::clone(&transport), Arc::clone(&registry));
        let coordinator =
            RequestCoordinator::new(Arc::clone(&transport), Arc::clone(&registry), &config);

        Self {
            timeout: RwLock::new(config.request_timeout),
            config,
            transport,
            registry,
            subscriptions,
            coordinator,
        }
    }

    /// Configuration the messenger was created with.
    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Current default request timeout.
    pub fn timeout(&self) -> Duration {
        *self.timeout.read()
    }

    /// Change the default request timeout for subsequent requests.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write() = timeout;
        debug!(timeout_ms = timeout.as_millis() as u64, "Default request timeout changed");
    }

    /// Start the reply listener eagerly. Requests start it on demand otherwise.
    pub async fn start(&self) -> MessengerResult<()> {
        self.coordinator.start().await
    }

    /// Dispose every subscription, stop the reply listener and fail
    /// outstanding requests with "Messenger Stopped.".
    pub async fn stop(&self) {
        let disposed = self.subscriptions.dispose_all().await;
        let failed = self.coordinator.shutdown().await;
        info!(
            subscriptions = disposed,
            failed_requests = failed,
            "Messenger stopped"
        );
    }

    // =========================================================================
    // Exchanges
    // =========================================================================

    /// Declare an exchange.
    ///
    /// ```ignore
    /// messenger.exchange("test", ExchangeOptions::topic()).await?;
    /// ```
    pub async fn exchange(
        &self,
        name: &str,
        options: impl Into<Option<ExchangeOptions>>,
    ) -> MessengerResult<Exchange> {
        self.registry.declare(name, options.into()).await
    }

    /// The exchange registry.
    pub fn registry(&self) -> &ExchangeRegistry {
        &self.registry
    }

    // =========================================================================
    // Publish / Subscribe
    // =========================================================================

    /// Publish a message. Succeeds once the transport accepts it, whether or
    /// not anyone is subscribed.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        shape: Option<&dyn Shape>,
    ) -> MessengerResult<()> {
        self.send(exchange, routing_key, payload, shape, None, Headers::new())
            .await
    }

    /// Publish with per-call options.
    pub async fn publish_with<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        options: PublishOptions,
    ) -> MessengerResult<()> {
        self.send(
            exchange,
            routing_key,
            payload,
            options.shape.as_deref(),
            options.trace_id,
            options.headers,
        )
        .await
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        shape: Option<&dyn Shape>,
        trace_id: Option<String>,
        mut headers: Headers,
    ) -> MessengerResult<()> {
        if !self.registry.contains(exchange) {
            return Err(MessengerError::exchange(messages::INVALID_PUBLISH_EXCHANGE));
        }

        let payload = codec::to_value(payload)?;
        codec::validate(&payload, shape)
            .map_err(|e| MessengerError::validation(messages::INVALID_PAYLOAD_TYPE, e))?;
        let body = codec::encode(&payload)?;

        headers.retain(|key, _| !RESERVED_HEADERS.contains(&key.as_str()));
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        headers.insert(HEADER_TRACE_ID.to_string(), trace_id);

        let routed = self
            .transport
            .publish_raw(exchange, routing_key, body, headers)
            .await?;
        debug!(
            exchange = exchange,
            routing_key = routing_key,
            routed = routed,
            "Message published"
        );
        Ok(())
    }

    /// Subscribe `handler` to messages on `exchange` matching `pattern`.
    ///
    /// `*` matches exactly one routing-key word and `#` matches zero or more.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        exchange: &str,
        pattern: &str,
        handler: H,
        shape: Option<ShapeRef>,
    ) -> MessengerResult<Subscription> {
        self.subscriptions
            .subscribe(exchange, pattern, handler, shape)
            .await
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_count()
    }

    // =========================================================================
    // Request / Response
    // =========================================================================

    /// Send a request and wait for its reply, using the default timeout.
    ///
    /// `response_shape`, if given, is checked against the reply before it is
    /// returned.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        response_shape: Option<ShapeRef>,
    ) -> MessengerResult<Value> {
        let options = RequestOptions {
            response_shape,
            ..RequestOptions::default()
        };
        self.request_with(exchange, routing_key, payload, &options)
            .await
    }

    /// Send a request with per-call options.
    pub async fn request_with<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        options: &RequestOptions,
    ) -> MessengerResult<Value> {
        let payload = codec::to_value(payload)?;
        self.coordinator
            .request(exchange, routing_key, payload, options, self.timeout())
            .await
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.coordinator.pending().pending_count()
    }

    /// Request lifecycle counters.
    pub fn stats(&self) -> &PendingStats {
        self.coordinator.pending().stats()
    }
}
