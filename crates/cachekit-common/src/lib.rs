//! # CacheKit Common
//!
//! Logging configuration, retry and timeout helpers used by the CacheKit
//! offline worker crates.

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// Error raised by the shared helpers.
#[derive(Error, Debug)]
pub enum CacheKitError {
    /// The wrapped operation did not finish in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for CacheKit operations.
pub type Result<T> = std::result::Result<T, CacheKitError>;
