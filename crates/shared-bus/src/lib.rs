//! # Shared Bus - Publish/Subscribe Transport
//!
//! The transport port the messenger is written against, plus an in-process
//! implementation.
//!
//! ## Routing Model
//!
//! ```text
//! ┌──────────────┐   publish_raw(exchange, key)   ┌──────────────────┐
//! │  Publisher   │ ─────────────────────────────▶ │    Exchange      │
//! └──────────────┘                                │ topic/direct/... │
//!                                                 └────────┬─────────┘
//!                                  pattern match per binding│
//!                          ┌───────────────────────────────┼──────────┐
//!                          ▼                               ▼          ▼
//!                   ┌────────────┐                  ┌────────────┐   ...
//!                   │ binding #  │                  │ binding k  │
//!                   │ mpsc chan  │                  │ mpsc chan  │
//!                   └────────────┘                  └────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! None beyond "accepted". A full subscriber channel drops the message and
//! logs a warning; ordering holds only per binding.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod publisher;
pub mod routing;
pub mod transport;

// Re-export main types
pub use publisher::InMemoryTopicBus;
pub use routing::RoutingPattern;
pub use transport::{RawSubscription, SubscriptionId, Transport};

/// Maximum deliveries to buffer per binding before messages are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
