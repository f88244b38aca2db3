//! Shared error types for the port traits.

use thiserror::Error;

/// Store error type, shared by all persistence ports.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Row exists but violates a domain invariant (e.g. a task referencing
    /// both an action and a campaign)
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Mail transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network-level failure reaching the send API
    #[error("Network error: {0}")]
    Network(String),

    /// The send API rejected the message
    #[error("Send rejected: {0}")]
    Rejected(String),

    /// Malformed response from the send API
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
