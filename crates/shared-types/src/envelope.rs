//! # Delivery Envelope
//!
//! The unit of transit between a transport and its subscribers.
//!
//! ## Headers
//!
//! Request/response flows are expressed entirely through headers so that
//! any transport carrying a string map can host them:
//!
//! | Header | Meaning |
//! |--------|---------|
//! | `correlation-id` | Links a reply to its request |
//! | `reply-to` | Routing key the reply must be published with |
//! | `reply-exchange` | Exchange the reply must be published to |
//! | `x-reply-status` | `ok` or `error` on reply messages |
//! | `trace-id` | Propagated through request and reply for log correlation |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the correlation id.
pub const HEADER_CORRELATION_ID: &str = "correlation-id";

/// Header carrying the reply routing key.
pub const HEADER_REPLY_TO: &str = "reply-to";

/// Header carrying the reply exchange.
pub const HEADER_REPLY_EXCHANGE: &str = "reply-exchange";

/// Header marking a reply as success or failure.
pub const HEADER_REPLY_STATUS: &str = "x-reply-status";

/// Header carrying the trace id.
pub const HEADER_TRACE_ID: &str = "trace-id";

/// Message headers.
pub type Headers = BTreeMap<String, String>;

/// Where a request's reply must be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    /// Exchange to publish the reply to.
    pub exchange: String,
    /// Routing key to publish the reply with.
    pub routing_key: String,
}

impl ReplyTo {
    /// Create a reply route.
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Write this route into a header map.
    pub fn write_headers(&self, headers: &mut Headers) {
        headers.insert(HEADER_REPLY_EXCHANGE.to_string(), self.exchange.clone());
        headers.insert(HEADER_REPLY_TO.to_string(), self.routing_key.clone());
    }

    /// Read a route from a header map. Both headers must be present.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        let exchange = headers.get(HEADER_REPLY_EXCHANGE)?;
        let routing_key = headers.get(HEADER_REPLY_TO)?;
        Some(Self::new(exchange.clone(), routing_key.clone()))
    }
}

/// Outcome marker carried by reply messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// Handler resolved the request.
    Ok,
    /// Handler rejected the request.
    Error,
}

impl ReplyStatus {
    /// Header value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Error => "error",
        }
    }

    /// Parse the header value; anything but `error` counts as success.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("error") => ReplyStatus::Error,
            _ => ReplyStatus::Ok,
        }
    }
}

/// A message as handed to a subscriber. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Encoded payload.
    pub body: Vec<u8>,
    /// Message headers.
    pub headers: Headers,
}

impl Delivery {
    /// Correlation id header, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(HEADER_CORRELATION_ID).map(String::as_str)
    }

    /// Reply route, if this message is a request.
    #[must_use]
    pub fn reply_to(&self) -> Option<ReplyTo> {
        ReplyTo::from_headers(&self.headers)
    }

    /// Trace id header, if any.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.headers.get(HEADER_TRACE_ID).map(String::as_str)
    }

    /// Reply status header.
    #[must_use]
    pub fn reply_status(&self) -> ReplyStatus {
        ReplyStatus::from_header(self.headers.get(HEADER_REPLY_STATUS).map(String::as_str))
    }

    /// A message is a request when it carries both a reply route and a correlation id.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.correlation_id().is_some() && self.reply_to().is_some()
    }
}
