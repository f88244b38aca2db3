//! Core types and port traits for the maildrop delivery dispatcher.
//!
//! This crate defines:
//! - Domain model types shared across the workspace (tasks, campaigns,
//!   actions, templates, contacts, projects, email receipts)
//! - Port traits the dispatcher consumes (stores and the mail transport)
//! - Shared error types for those ports
//!
//! Everything here is plain data and trait definitions; implementations live
//! in `maildrop-database`, `mail-transport` and the test fakes.

mod error;
mod models;
mod ports;

pub use error::{StoreError, StoreResult, TransportError, TransportResult};
pub use models::*;
pub use ports::{
    CampaignStore, ContactTriggerStore, EmailReceiptStore, MailTransport, ProjectStore, TaskStore,
};
