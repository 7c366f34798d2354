//! Integration tests over the public messenger API.

pub mod pubsub;
pub mod request_reply;
