//! Per-message context handed to subscription handlers.

use crate::domain::codec;
use crate::domain::error::{ErrorEvent, MessengerResult};
use serde::Serialize;
use shared_bus::Transport;
use shared_types::{
    Delivery, Headers, ReplyStatus, ReplyTo, HEADER_CORRELATION_ID, HEADER_REPLY_STATUS,
    HEADER_TRACE_ID,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct ContextInner {
    exchange: String,
    routing_key: String,
    headers: Headers,
    correlation_id: Option<String>,
    reply_to: Option<ReplyTo>,
    replied: AtomicBool,
    transport: Arc<dyn Transport>,
}

/// Metadata and reply capability for one received message.
///
/// Cheap to clone; clones share the "already replied" flag, so a message is
/// answered at most once no matter how many copies the handler makes.
#[derive(Clone)]
pub struct MessageContext {
    inner: Arc<ContextInner>,
}

impl MessageContext {
    pub(crate) fn from_delivery(delivery: &Delivery, transport: Arc<dyn Transport>) -> Self {
        let correlation_id = delivery.correlation_id().map(str::to_string);
        let reply_to = delivery.reply_to();
        Self {
            inner: Arc::new(ContextInner {
                exchange: delivery.exchange.clone(),
                routing_key: delivery.routing_key.clone(),
                headers: delivery.headers.clone(),
                correlation_id,
                reply_to,
                replied: AtomicBool::new(false),
                transport,
            }),
        }
    }

    /// Exchange the message arrived on.
    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        &self.inner.routing_key
    }

    /// All message headers.
    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    /// Correlation id, present on requests.
    pub fn correlation_id(&self) -> Option<&str> {
        self.inner.correlation_id.as_deref()
    }

    /// Trace id propagated from the publisher.
    pub fn trace_id(&self) -> Option<&str> {
        self.inner.headers.get(HEADER_TRACE_ID).map(String::as_str)
    }

    /// True if the sender is waiting for a reply.
    pub fn is_request(&self) -> bool {
        self.inner.correlation_id.is_some() && self.inner.reply_to.is_some()
    }

    /// True once `resolve` or `reject` has sent a reply.
    pub fn has_replied(&self) -> bool {
        self.inner.replied.load(Ordering::SeqCst)
    }

    /// Answer the request with `response`.
    ///
    /// No-op for plain messages and for every call after the first.
    pub async fn resolve<T: Serialize>(&self, response: T) -> MessengerResult<()> {
        if !self.is_request() {
            debug!(routing_key = %self.inner.routing_key, "resolve() on a non-request message ignored");
            return Ok(());
        }
        let body = codec::encode(&codec::to_value(&response)?)?;
        self.reply(ReplyStatus::Ok, body).await
    }

    /// Refuse the request; the requester receives `error` as an `ErrorEvent`.
    ///
    /// No-op for plain messages and for every call after the first.
    pub async fn reject(&self, error: impl Into<ErrorEvent>) -> MessengerResult<()> {
        if !self.is_request() {
            debug!(routing_key = %self.inner.routing_key, "reject() on a non-request message ignored");
            return Ok(());
        }
        let body = serde_json::to_vec(&error.into())?;
        self.reply(ReplyStatus::Error, body).await
    }

    async fn reply(&self, status: ReplyStatus, body: Vec<u8>) -> MessengerResult<()> {
        let (Some(reply_to), Some(correlation_id)) =
            (&self.inner.reply_to, &self.inner.correlation_id)
        else {
            return Ok(());
        };

        if self.inner.replied.swap(true, Ordering::SeqCst) {
            warn!(
                correlation_id = %correlation_id,
                status = status.as_str(),
                "Reply already sent for this message; ignoring"
            );
            return Ok(());
        }

        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID.to_string(), correlation_id.clone());
        headers.insert(HEADER_REPLY_STATUS.to_string(), status.as_str().to_string());
        if let Some(trace_id) = self.trace_id() {
            headers.insert(HEADER_TRACE_ID.to_string(), trace_id.to_string());
        }

        self.inner
            .transport
            .publish_raw(&reply_to.exchange, &reply_to.routing_key, body, headers)
            .await?;

        debug!(
            correlation_id = %correlation_id,
            reply_to = %reply_to.routing_key,
            status = status.as_str(),
            "Reply sent"
        );
        Ok(())
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("exchange", &self.inner.exchange)
            .field("routing_key", &self.inner.routing_key)
            .field("correlation_id", &self.inner.correlation_id)
            .field("reply_to", &self.inner.reply_to)
            .field("replied", &self.has_replied())
            .finish()
    }
}
