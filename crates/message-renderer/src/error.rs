//! Render error types.

use thiserror::Error;

/// Render error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A required template/campaign field is empty or unresolvable
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
