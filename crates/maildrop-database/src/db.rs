//! Database connection and query operations.

use crate::{
    migrations, queries, DatabaseResult, NewAction, NewCampaign, NewContact, NewProject, NewTask,
    NewTemplate,
};
use chrono::{DateTime, Utc};
use maildrop_core::{
    Campaign, CampaignStatus, Contact, ContactTrigger, EligibleTask, NewEmailReceipt, Project,
    Task, TaskStatus,
};
use rusqlite::Connection;
use std::path::Path;

/// Database wrapper with query methods.
///
/// Sync access over a single connection; async callers should use
/// [`crate::AsyncDatabase`] instead. All SQL lives in [`crate::queries`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode and performance optimizations
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ==========================================
    // Projects and contacts
    // ==========================================

    pub fn insert_project(&self, project: &NewProject) -> DatabaseResult<()> {
        queries::insert_project(&self.conn, project)
    }

    pub fn get_project(&self, id: &str) -> DatabaseResult<Option<Project>> {
        queries::get_project(&self.conn, id)
    }

    pub fn delete_project(&self, id: &str) -> DatabaseResult<bool> {
        queries::delete_project(&self.conn, id)
    }

    pub fn insert_contact(&self, contact: &NewContact) -> DatabaseResult<()> {
        queries::insert_contact(&self.conn, contact)
    }

    pub fn get_contact(&self, id: &str) -> DatabaseResult<Option<Contact>> {
        queries::get_contact(&self.conn, id)
    }

    pub fn insert_contact_trigger(&self, event_id: &str, contact_id: &str) -> DatabaseResult<()> {
        queries::insert_contact_trigger(&self.conn, event_id, contact_id)
    }

    pub fn triggers_for_contact(&self, contact_id: &str) -> DatabaseResult<Vec<ContactTrigger>> {
        queries::triggers_for_contact(&self.conn, contact_id)
    }

    // ==========================================
    // Templates, actions, campaigns
    // ==========================================

    pub fn insert_template(&self, template: &NewTemplate) -> DatabaseResult<()> {
        queries::insert_template(&self.conn, template)
    }

    pub fn insert_action(&self, action: &NewAction) -> DatabaseResult<()> {
        queries::insert_action(&self.conn, action)
    }

    pub fn insert_campaign(&self, campaign: &NewCampaign) -> DatabaseResult<()> {
        queries::insert_campaign(&self.conn, campaign)
    }

    pub fn get_campaign(&self, id: &str) -> DatabaseResult<Option<Campaign>> {
        queries::get_campaign(&self.conn, id)
    }

    pub fn update_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> DatabaseResult<bool> {
        queries::update_campaign_status(&self.conn, id, status)
    }

    pub fn mark_campaign_delivered(
        &self,
        id: &str,
        delivered_at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        queries::mark_campaign_delivered(&self.conn, id, delivered_at)
    }

    // ==========================================
    // Tasks and receipts
    // ==========================================

    pub fn insert_task(&self, task: &NewTask) -> DatabaseResult<()> {
        queries::insert_task(&self.conn, task)
    }

    pub fn get_task(&self, id: &str) -> DatabaseResult<Option<Task>> {
        queries::get_task(&self.conn, id)
    }

    pub fn list_eligible_tasks(&self, limit: u64) -> DatabaseResult<Vec<EligibleTask>> {
        queries::list_eligible_tasks(&self.conn, limit)
    }

    pub fn claim_task(&self, task_id: &str) -> DatabaseResult<bool> {
        queries::claim_task(&self.conn, task_id)
    }

    pub fn update_task_status(&self, task_id: &str, status: TaskStatus) -> DatabaseResult<bool> {
        queries::update_task_status(&self.conn, task_id, status)
    }

    pub fn bulk_fail_and_delete_project_tasks(&self, project_id: &str) -> DatabaseResult<u64> {
        queries::bulk_fail_and_delete_project_tasks(&self.conn, project_id)
    }

    pub fn count_tasks_by_campaign_and_status(
        &self,
        campaign_id: &str,
        status: TaskStatus,
    ) -> DatabaseResult<u64> {
        queries::count_tasks_by_campaign_and_status(&self.conn, campaign_id, status)
    }

    pub fn insert_email(&self, receipt: &NewEmailReceipt) -> DatabaseResult<()> {
        queries::insert_email(&self.conn, receipt)
    }

    pub fn count_emails(&self) -> DatabaseResult<u64> {
        queries::count_emails(&self.conn)
    }

    pub fn count_emails_for_contact(&self, contact_id: &str) -> DatabaseResult<u64> {
        queries::count_emails_for_contact(&self.conn, contact_id)
    }
}
