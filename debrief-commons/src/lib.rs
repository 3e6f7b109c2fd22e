//! Shared building blocks for the debrief-calc client crates.
//!
//! `error_category` gives every failure in the client a canonical
//! classification so callers can decide whether to offer a retry, and
//! `clock` abstracts wall-clock reads so circuit-breaker and cache ages can be
//! driven deterministically from tests.

pub mod clock;
pub mod error_category;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error_category::{
    BackoffStrategy, ErrorCategory, Retryability, classify_anyhow_error, classify_engine_code,
    classify_error_message,
};
