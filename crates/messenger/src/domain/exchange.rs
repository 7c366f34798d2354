//! Exchange registry.
//!
//! Every publish, subscribe and request checks the registry before touching
//! the transport, so a typo in an exchange name fails fast with a clear
//! message instead of silently going nowhere.

use crate::domain::error::{messages, MessengerError, MessengerResult};
use parking_lot::RwLock;
use shared_bus::Transport;
use shared_types::{ExchangeKind, ExchangeOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A declared exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Unique name.
    pub name: String,
    /// Routing discipline.
    pub kind: ExchangeKind,
    /// Options it was declared with.
    pub options: ExchangeOptions,
}

/// Tracks exchanges declared through this messenger.
pub struct ExchangeRegistry {
    transport: Arc<dyn Transport>,
    exchanges: RwLock<HashMap<String, Exchange>>,
    /// Name owned by the messenger itself (the reply exchange).
    reserved: Option<String>,
}

impl ExchangeRegistry {
    /// Create an empty registry over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            exchanges: RwLock::new(HashMap::new()),
            reserved: None,
        }
    }

    /// Create a registry that refuses to declare `reserved`.
    pub fn with_reserved(transport: Arc<dyn Transport>, reserved: impl Into<String>) -> Self {
        Self {
            reserved: Some(reserved.into()),
            ..Self::new(transport)
        }
    }

    /// Declare an exchange on the transport and record it.
    ///
    /// Re-declaring with identical options is a no-op; different options
    /// for a known name, or the reserved name, are a configuration error.
    pub async fn declare(
        &self,
        name: &str,
        options: Option<ExchangeOptions>,
    ) -> MessengerResult<Exchange> {
        let options =
            options.ok_or_else(|| MessengerError::configuration(messages::EXCHANGE_WITHOUT_OPTIONS))?;
        let kind = options
            .kind
            .ok_or_else(|| MessengerError::configuration(messages::EXCHANGE_WITHOUT_OPTIONS))?;

        if self.reserved.as_deref() == Some(name) {
            return Err(MessengerError::configuration(format!(
                "Exchange {} is reserved for replies.",
                name
            )));
        }

        if let Some(existing) = self.lookup(name) {
            if existing.options == options {
                debug!(exchange = name, "Exchange already declared");
                return Ok(existing);
            }
            return Err(conflict(name));
        }

        self.transport.declare_exchange(name, &options).await?;

        let exchange = Exchange {
            name: name.to_string(),
            kind,
            options,
        };

        // A concurrent declare may have won; keep whichever landed first.
        let recorded = self
            .exchanges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| exchange.clone())
            .clone();
        if recorded.options != exchange.options {
            return Err(conflict(name));
        }

        debug!(exchange = name, kind = %kind, "Exchange registered");
        Ok(recorded)
    }

    /// Look up a declared exchange.
    pub fn lookup(&self, name: &str) -> Option<Exchange> {
        self.exchanges.read().get(name).cloned()
    }

    /// True if the exchange was declared.
    pub fn contains(&self, name: &str) -> bool {
        self.exchanges.read().contains_key(name)
    }

    /// Names of all declared exchanges, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exchanges.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of declared exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.read().len()
    }

    /// True if nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.exchanges.read().is_empty()
    }
}

fn conflict(name: &str) -> MessengerError {
    MessengerError::configuration(format!(
        "Exchange {} already declared with different options.",
        name
    ))
}
