//! Messaging layer: subscriptions, handler dispatch, and request/response.

pub mod context;
pub mod coordinator;
pub mod handler;
pub mod subscription;

pub use context::MessageContext;
pub use coordinator::{RequestCoordinator, RequestOptions};
pub use handler::MessageHandler;
pub use subscription::{Subscription, SubscriptionManager};
