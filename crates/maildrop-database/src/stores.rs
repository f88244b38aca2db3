//! Port implementations over [`AsyncDatabase`].
//!
//! `SqliteStores` is a cheap-clone handle implementing every store port the
//! dispatcher consumes. Each method is a thin `db.call()` around the matching
//! `queries::` function; owned copies of the arguments cross into the closure
//! since it runs on the executor thread.

use crate::{queries, AsyncDatabase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maildrop_core::{
    CampaignStore, ContactTrigger, ContactTriggerStore, EligibleTask, EmailReceiptStore,
    NewEmailReceipt, Project, ProjectStore, StoreResult, TaskStatus, TaskStore,
};

/// SQLite-backed implementation of the store ports.
#[derive(Clone)]
pub struct SqliteStores {
    db: AsyncDatabase,
}

impl SqliteStores {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }
}

#[async_trait]
impl TaskStore for SqliteStores {
    async fn list_eligible(&self, limit: u64) -> StoreResult<Vec<EligibleTask>> {
        let tasks = self
            .db
            .call(move |conn| queries::list_eligible_tasks(conn, limit))
            .await?;
        Ok(tasks)
    }

    async fn claim(&self, task_id: &str) -> StoreResult<bool> {
        let task_id = task_id.to_string();
        let claimed = self
            .db
            .call(move |conn| queries::claim_task(conn, &task_id))
            .await?;
        Ok(claimed)
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<bool> {
        let task_id = task_id.to_string();
        let changed = self
            .db
            .call(move |conn| queries::update_task_status(conn, &task_id, status))
            .await?;
        Ok(changed)
    }

    async fn bulk_fail_and_delete_for_project(&self, project_id: &str) -> StoreResult<u64> {
        let project_id = project_id.to_string();
        let removed = self
            .db
            .call(move |conn| queries::bulk_fail_and_delete_project_tasks(conn, &project_id))
            .await?;
        Ok(removed)
    }

    async fn count_by_campaign_and_status(
        &self,
        campaign_id: &str,
        status: TaskStatus,
    ) -> StoreResult<u64> {
        let campaign_id = campaign_id.to_string();
        let count = self
            .db
            .call(move |conn| {
                queries::count_tasks_by_campaign_and_status(conn, &campaign_id, status)
            })
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ProjectStore for SqliteStores {
    async fn get(&self, project_id: &str) -> StoreResult<Option<Project>> {
        let project_id = project_id.to_string();
        let project = self
            .db
            .call(move |conn| queries::get_project(conn, &project_id))
            .await?;
        Ok(project)
    }
}

#[async_trait]
impl ContactTriggerStore for SqliteStores {
    async fn triggers_for(&self, contact_id: &str) -> StoreResult<Vec<ContactTrigger>> {
        let contact_id = contact_id.to_string();
        let triggers = self
            .db
            .call(move |conn| queries::triggers_for_contact(conn, &contact_id))
            .await?;
        Ok(triggers)
    }
}

#[async_trait]
impl CampaignStore for SqliteStores {
    async fn mark_delivered(
        &self,
        campaign_id: &str,
        delivered_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let campaign_id = campaign_id.to_string();
        let changed = self
            .db
            .call(move |conn| queries::mark_campaign_delivered(conn, &campaign_id, delivered_at))
            .await?;
        Ok(changed)
    }
}

#[async_trait]
impl EmailReceiptStore for SqliteStores {
    async fn create(&self, receipt: NewEmailReceipt) -> StoreResult<()> {
        self.db
            .call(move |conn| queries::insert_email(conn, &receipt))
            .await?;
        Ok(())
    }
}
