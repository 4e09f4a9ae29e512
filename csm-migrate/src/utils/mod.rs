//! Utility modules for csm-migrate

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
