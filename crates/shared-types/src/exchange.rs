//! # Exchange Vocabulary
//!
//! Exchange kinds and declaration options understood by every transport.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::TransportError;

/// Routing discipline of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Hierarchical routing keys matched against `*` / `#` patterns.
    Topic,
    /// Routing key must equal the binding key exactly.
    Direct,
    /// Every binding receives every message.
    Fanout,
    /// Routing on message headers. Declared for compatibility; routed like `Fanout`
    /// by transports without header-matching support.
    Headers,
}

impl ExchangeKind {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "topic" => Ok(ExchangeKind::Topic),
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(TransportError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Options supplied when declaring an exchange.
///
/// `kind` is optional at the type level so that "options without a kind"
/// can be represented and rejected by the registry, mirroring the JSON
/// form `{ "type": "topic" }` used by configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeOptions {
    /// Exchange kind.
    #[serde(rename = "type", alias = "kind")]
    pub kind: Option<ExchangeKind>,
    /// Survive broker restarts (advisory for in-memory transports).
    pub durable: bool,
    /// Delete once the last binding goes away (advisory).
    pub auto_delete: bool,
    /// Free-form broker arguments.
    pub arguments: BTreeMap<String, String>,
}

impl ExchangeOptions {
    /// Options for an exchange of the given kind.
    #[must_use]
    pub fn new(kind: ExchangeKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Shorthand for a topic exchange.
    #[must_use]
    pub fn topic() -> Self {
        Self::new(ExchangeKind::Topic)
    }

    /// Shorthand for a direct exchange.
    #[must_use]
    pub fn direct() -> Self {
        Self::new(ExchangeKind::Direct)
    }

    /// Shorthand for a fanout exchange.
    #[must_use]
    pub fn fanout() -> Self {
        Self::new(ExchangeKind::Fanout)
    }

    /// Mark the exchange durable.
    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Attach a broker argument.
    #[must_use]
    pub fn argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}
