//! Counter store error types.

use thiserror::Error;

/// Counter store error type.
#[derive(Error, Debug)]
pub enum CounterError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store unavailable or returned an unusable response
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using CounterError.
pub type CounterResult<T> = Result<T, CounterError>;
