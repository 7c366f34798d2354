//! Messenger - typed exchanges and request/reply over publish/subscribe.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            MESSENGER                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │   exchange()        publish()        subscribe()        request()   │
//! │       │                 │                 │                 │       │
//! │  ┌────┴─────┐     ┌─────┴─────┐   ┌───────┴───────┐  ┌──────┴─────┐ │
//! │  │ Exchange │     │   Codec   │   │ Subscription  │  │  Request   │ │
//! │  │ Registry │◀────│ + Shapes  │◀──│   Manager     │  │ Coordinator│ │
//! │  └──────────┘     └───────────┘   └───────┬───────┘  └──────┬─────┘ │
//! │                                           │       pending table     │
//! │                                           │      (correlation id)   │
//! └───────────────────────────────────────────┼─────────────────┼───────┘
//!                                             │                 │
//!                                     Transport (shared-bus)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use messenger::{Messenger, MessageContext};
//! use shared_bus::InMemoryTopicBus;
//! use shared_types::ExchangeOptions;
//!
//! let messenger = Messenger::with_defaults(Arc::new(InMemoryTopicBus::new()));
//! messenger.exchange("test", ExchangeOptions::topic()).await?;
//! messenger
//!     .subscribe("test", "#", |_payload, message: MessageContext| async move {
//!         message.resolve(json!({ "world": "hello" })).await?;
//!         Ok(())
//!     }, None)
//!     .await?;
//! let reply = messenger.request("test", "test", &json!({ "hello": "world" }), None).await?;
//! ```
//!
//! # Outcomes
//!
//! Every request ends in exactly one of: the decoded reply, the handler's
//! `ErrorEvent`, "Invalid Response Type.", or "Request Timed Out.". Replies
//! arriving after that are discarded.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod ipc;
pub mod service;

// Re-exports for public API
pub use domain::config::MessengerConfig;
pub use domain::error::{messages, ErrorEvent, MessengerError, MessengerResult};
pub use domain::{
    CorrelationId, Exchange, IpAddressShape, PendingStats, RequiredFields, Shape, ShapeError,
    ShapeRef, Typed,
};
pub use ipc::{MessageContext, MessageHandler, RequestOptions, Subscription};
pub use service::{Messenger, PublishOptions};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
