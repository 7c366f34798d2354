//! Domain types for the messenger.
//!
//! Correlation ids, errors, configuration, payload shapes and codec, the
//! exchange registry and the pending-request table. Nothing here spawns
//! tasks; the async plumbing lives in `crate::ipc`.

pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod exchange;
pub mod pending;
pub mod shape;

// Re-exports for convenience
pub use config::{ConfigError, MessengerConfig};
pub use correlation::CorrelationId;
pub use error::{messages, ErrorEvent, MessengerError, MessengerResult};
pub use exchange::{Exchange, ExchangeRegistry};
pub use pending::{PendingRequestStore, PendingStats, RequestOutcome};
pub use shape::{IpAddressShape, RequiredFields, Shape, ShapeError, ShapeRef, Typed};
