//! Port traits consumed by the dispatcher.
//!
//! Implementations are constructor-injected (`Arc<dyn Trait>`) so tests can
//! substitute fakes. The SQLite implementations live in `maildrop-database`;
//! the HTTP mail transport in `mail-transport`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreResult, TransportResult};
use crate::models::{
    ContactTrigger, EligibleTask, NewEmailReceipt, OutboundEmail, Project, SendReceipt, TaskStatus,
};

/// Durable queue of send-tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Claim up to `limit` eligible pending tasks, oldest eligible first,
    /// with action/template/suppression-events, campaign and contact joined.
    async fn list_eligible(&self, limit: u64) -> StoreResult<Vec<EligibleTask>>;

    /// Atomically move one task from pending to processing. Returns false
    /// when the task is no longer pending (another instance claimed it, or
    /// it already settled); the caller must then skip the task.
    async fn claim(&self, task_id: &str) -> StoreResult<bool>;

    /// Update one task's status. Returns whether a row changed.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<bool>;

    /// Mark every non-terminal task of a vanished project failed, then delete
    /// them. Returns the number of tasks cleaned up.
    async fn bulk_fail_and_delete_for_project(&self, project_id: &str) -> StoreResult<u64>;

    /// Count tasks for a campaign in the given status.
    async fn count_by_campaign_and_status(
        &self,
        campaign_id: &str,
        status: TaskStatus,
    ) -> StoreResult<u64>;
}

/// Tenant lookup.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, project_id: &str) -> StoreResult<Option<Project>>;
}

/// Events previously triggered by a contact, for suppression checks.
#[async_trait]
pub trait ContactTriggerStore: Send + Sync {
    async fn triggers_for(&self, contact_id: &str) -> StoreResult<Vec<ContactTrigger>>;
}

/// Campaign terminal-state writes.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Set the campaign to delivered with the given timestamp. Returns false
    /// when the campaign was already delivered (no-op, idempotent).
    async fn mark_delivered(
        &self,
        campaign_id: &str,
        delivered_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Immutable delivery receipts.
#[async_trait]
pub trait EmailReceiptStore: Send + Sync {
    async fn create(&self, receipt: NewEmailReceipt) -> StoreResult<()>;
}

/// Outbound mail transport (an SES-like send API).
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> TransportResult<SendReceipt>;
}
