//! Email rendering.
//!
//! Resolves a claimed task's content (an action's template or a campaign)
//! against the contact's merge fields and the project's sender settings into
//! a ready-to-send email. Pure functions of their inputs, no I/O.

mod error;
mod merge;
mod render;

pub use error::RenderError;
pub use render::{render, RenderedEmail};
