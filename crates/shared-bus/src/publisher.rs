//! # In-Memory Topic Bus
//!
//! Single-process implementation of [`Transport`].

use crate::routing::RoutingPattern;
use crate::transport::{RawSubscription, SubscriptionId, Transport};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{Delivery, ExchangeKind, ExchangeOptions, Headers, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A binding of one subscriber to one exchange.
struct Binding {
    exchange: String,
    pattern: RoutingPattern,
    sender: mpsc::Sender<Delivery>,
}

/// In-memory implementation of the transport.
///
/// Each binding owns a bounded `tokio::sync::mpsc` channel. Publishing never
/// waits on a slow subscriber: a full channel drops the message with a
/// warning. Suitable for tests and single-process deployments; a broker
/// backed transport would implement the same trait.
pub struct InMemoryTopicBus {
    /// Declared exchanges by name.
    exchanges: RwLock<HashMap<String, ExchangeKind>>,

    /// Active bindings by id.
    bindings: RwLock<HashMap<SubscriptionId, Binding>>,

    /// Next binding id.
    next_id: AtomicU64,

    /// Total messages accepted for publishing.
    messages_published: AtomicU64,

    /// Per-binding channel capacity.
    capacity: usize,

    /// Set once the bus is closed.
    closed: AtomicBool,
}

impl InMemoryTopicBus {
    /// Create a new bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with the given per-binding capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            exchanges: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            messages_published: AtomicU64::new(0),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Per-binding channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    /// Total messages accepted for publishing.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// True if the exchange has been declared.
    #[must_use]
    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.read().contains_key(name)
    }

    /// Close the bus: every binding is dropped and further operations fail
    /// with [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut bindings = self.bindings.write();
            let count = bindings.len();
            bindings.clear();
            count
        };
        debug!(bindings = dropped, "Topic bus closed");
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn kind_of(&self, exchange: &str) -> Result<ExchangeKind, TransportError> {
        self.exchanges
            .read()
            .get(exchange)
            .copied()
            .ok_or_else(|| TransportError::UnknownExchange(exchange.to_string()))
    }
}

impl Default for InMemoryTopicBus {
    fn default() -> Self {
        Self::new()
    }
}

fn routes(kind: ExchangeKind, binding: &Binding, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Topic => binding.pattern.matches(routing_key),
        ExchangeKind::Direct => binding.pattern.as_str() == routing_key,
        ExchangeKind::Fanout | ExchangeKind::Headers => true,
    }
}

#[async_trait]
impl Transport for InMemoryTopicBus {
    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let kind = options
            .kind
            .ok_or_else(|| TransportError::MissingKind(name.to_string()))?;

        let mut exchanges = self.exchanges.write();
        match exchanges.get(name) {
            Some(existing) if *existing == kind => {
                debug!(exchange = name, kind = %kind, "Exchange already declared");
                Ok(())
            }
            Some(existing) => Err(TransportError::ExchangeMismatch {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: kind.to_string(),
            }),
            None => {
                exchanges.insert(name.to_string(), kind);
                debug!(exchange = name, kind = %kind, "Exchange declared");
                Ok(())
            }
        }
    }

    async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let kind = self.kind_of(exchange)?;

        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let delivery = Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            headers,
        };

        let mut delivered = 0;
        let mut disconnected = Vec::new();
        {
            let bindings = self.bindings.read();
            for (id, binding) in bindings.iter() {
                if binding.exchange != exchange || !routes(kind, binding, routing_key) {
                    continue;
                }
                match binding.sender.try_send(delivery.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            exchange = exchange,
                            routing_key = routing_key,
                            subscription = %id,
                            "Message dropped (subscriber channel full)"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => disconnected.push(*id),
                }
            }
        }

        if !disconnected.is_empty() {
            let mut bindings = self.bindings.write();
            for id in &disconnected {
                bindings.remove(id);
            }
            debug!(pruned = disconnected.len(), "Pruned disconnected bindings");
        }

        debug!(
            exchange = exchange,
            routing_key = routing_key,
            receivers = delivered,
            "Message published"
        );

        Ok(delivered)
    }

    async fn subscribe_raw(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> Result<RawSubscription, TransportError> {
        self.ensure_open()?;
        self.kind_of(exchange)?;
        let pattern = RoutingPattern::parse(pattern)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);

        debug!(exchange = exchange, pattern = %pattern, subscription = %id, "Binding created");

        self.bindings.write().insert(
            id,
            Binding {
                exchange: exchange.to_string(),
                pattern,
                sender,
            },
        );

        Ok(RawSubscription { id, receiver })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        match self.bindings.write().remove(&id) {
            Some(binding) => {
                debug!(exchange = %binding.exchange, subscription = %id, "Binding removed");
                Ok(())
            }
            None => Err(TransportError::UnknownSubscription(id.0)),
        }
    }
}
