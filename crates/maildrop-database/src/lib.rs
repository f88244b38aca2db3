//! SQLite persistence layer for the maildrop delivery dispatcher.
//!
//! This crate provides:
//! - Versioned database migrations
//! - A sync `Database` wrapper with query methods (used by tests and tooling)
//! - An `AsyncDatabase` executor with a dedicated SQLite thread
//! - `SqliteStores`: the store-port implementations consumed by the dispatcher
//!
//! # Architecture
//!
//! All SQL lives in `queries::` free functions over `&rusqlite::Connection`.
//! Async callers go through `AsyncDatabase::call`, which ships the closure to
//! a dedicated thread so the Tokio runtime never blocks on SQLite:
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let tasks = db.call(|conn| queries::list_eligible_tasks(conn, 50)).await?;
//! ```
//!
//! Only SQL should run inside `call()`: no network, no heavy computation.

mod db;
mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod stores;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
pub use stores::SqliteStores;
