//! Dispatch error types.
//!
//! Only invocation-level failures surface here (nothing was claimed or
//! mutated yet). Per-task failures never abort a batch; they become
//! `TaskOutcome::Failed` and the task row is marked failed.

use maildrop_core::StoreError;
use thiserror::Error;

/// Dispatch error type.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The task store failed before any task was processed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
