//! # Error Types
//!
//! Errors raised by transport implementations.

use thiserror::Error;

/// Errors from transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Exchange was never declared on the transport.
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// Exchange exists with a different kind.
    #[error("Exchange {name} already declared as {existing}, not {requested}")]
    ExchangeMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    /// Exchange declared without a kind.
    #[error("Exchange {0} declared without a kind")]
    MissingKind(String),

    /// Exchange kind not supported.
    #[error("Unsupported exchange kind: {0}")]
    UnsupportedKind(String),

    /// Routing pattern could not be parsed.
    #[error("Invalid routing pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Subscription id unknown (never existed or already removed).
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    /// Transport connection closed.
    #[error("Transport closed")]
    Closed,
}
