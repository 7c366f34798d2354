//! # Shared Types Crate
//!
//! Wire-level vocabulary shared by every transport and by the messenger:
//! exchange kinds and options, the `Delivery` envelope, header names, and
//! transport errors.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Header names and envelope layout live here only.
//! - **Header-Only Correlation**: Request/response metadata travels in headers,
//!   never inside the payload.

pub mod envelope;
pub mod errors;
pub mod exchange;

pub use envelope::*;
pub use errors::*;
pub use exchange::{ExchangeKind, ExchangeOptions};
