//! Messenger error types.
//!
//! The message strings in [`messages`] are part of the public contract:
//! callers match on them, so they never change.

use crate::domain::shape::ShapeError;
use serde::{Deserialize, Serialize};
use shared_types::TransportError;
use std::fmt;

/// Contractual error messages.
pub mod messages {
    pub const EXCHANGE_WITHOUT_OPTIONS: &str = "Unable to Create Exchange without Options.";
    pub const INVALID_PUBLISH_EXCHANGE: &str = "Invalid Exchange Specified for Publish.";
    pub const INVALID_SUBSCRIPTION_EXCHANGE: &str = "Invalid Exchange Specified for Subscription.";
    pub const REQUEST_TIMED_OUT: &str = "Request Timed Out.";
    pub const INVALID_REQUEST_TYPE: &str = "Invalid Request Type.";
    pub const INVALID_RESPONSE_TYPE: &str = "Invalid Response Type.";
    pub const INVALID_PAYLOAD_TYPE: &str = "Invalid Payload Type.";
    pub const MESSENGER_STOPPED: &str = "Messenger Stopped.";
}

/// A structured rejection raised by a subscription handler and delivered to
/// the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Error class name (`Error`, `ValidationError`, ...).
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorEvent {
    /// Create an event named `Error`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            context: None,
        }
    }

    /// Set the error class name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// The event raised when an inbound request fails the subscriber's shape.
    pub fn invalid_request(reason: impl fmt::Display) -> Self {
        Self::new(messages::INVALID_REQUEST_TYPE)
            .with_name("ValidationError")
            .with_context(serde_json::json!({ "reason": reason.to_string() }))
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorEvent {}

impl From<anyhow::Error> for ErrorEvent {
    fn from(error: anyhow::Error) -> Self {
        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
        let event = Self::new(error.to_string());
        if causes.is_empty() {
            event
        } else {
            event.with_context(serde_json::json!({ "causes": causes }))
        }
    }
}

impl From<&str> for ErrorEvent {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorEvent {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced by messenger operations.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    /// Malformed or missing setup input.
    #[error("{0}")]
    Configuration(String),

    /// Reference to an exchange that was never declared.
    #[error("{0}")]
    Exchange(String),

    /// Payload does not match an expected shape.
    #[error("{message}")]
    Validation {
        message: String,
        #[source]
        reason: ShapeError,
    },

    /// No reply within the deadline.
    #[error("{}", messages::REQUEST_TIMED_OUT)]
    Timeout,

    /// Handler rejected the request.
    #[error(transparent)]
    Rejected(ErrorEvent),

    /// Messenger stopped while the request was outstanding.
    #[error("{}", messages::MESSENGER_STOPPED)]
    ShuttingDown,

    /// Payload could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport refused the operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl MessengerError {
    /// Configuration error with the given message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Exchange error with the given message.
    pub fn exchange(message: impl Into<String>) -> Self {
        Self::Exchange(message.into())
    }

    /// Validation error with the given message.
    pub fn validation(message: impl Into<String>, reason: ShapeError) -> Self {
        Self::Validation {
            message: message.into(),
            reason,
        }
    }

    /// True for [`MessengerError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// The handler's rejection, if this is one.
    pub fn error_event(&self) -> Option<&ErrorEvent> {
        match self {
            Self::Rejected(event) => Some(event),
            _ => None,
        }
    }
}

/// Result type for messenger operations
pub type MessengerResult<T> = Result<T, MessengerError>;
