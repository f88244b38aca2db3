//! Database migrations.
//!
//! All SQL migrations for the schema, run in order and tracked in the
//! `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_initial_schema(conn)?;
    }
    if current_version < 2 {
        migrate_v2_dispatch_indexes(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Initial schema - projects, contacts, templates, actions, campaigns,
/// tasks and email receipts.
fn migrate_v1_initial_schema(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            verified_domain INTEGER NOT NULL DEFAULT 0,
            default_from_name TEXT,
            default_sender_email TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- No FK to projects: a project may be removed while its contacts and
        -- tasks are still in flight; the dispatcher detects and cleans up.
        CREATE TABLE contacts (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            email TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            subscribed INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE contact_triggers (
            event_id TEXT NOT NULL,
            contact_id TEXT NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (event_id, contact_id)
        );

        CREATE TABLE templates (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            from_name TEXT,
            sender_email TEXT,
            is_html INTEGER NOT NULL DEFAULT 0,
            kind TEXT NOT NULL DEFAULT 'marketing',
            created_at TEXT NOT NULL
        );

        CREATE TABLE actions (
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL REFERENCES templates(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE action_suppressions (
            action_id TEXT NOT NULL REFERENCES actions(id) ON DELETE CASCADE,
            event_id TEXT NOT NULL,
            PRIMARY KEY (action_id, event_id)
        );

        CREATE TABLE campaigns (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            from_name TEXT,
            sender_email TEXT,
            is_html INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            delivered_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- A task references exactly one of an action or a campaign.
        CREATE TABLE tasks (
            id TEXT PRIMARY KEY,
            contact_id TEXT NOT NULL REFERENCES contacts(id),
            action_id TEXT REFERENCES actions(id),
            campaign_id TEXT REFERENCES campaigns(id),
            status TEXT NOT NULL DEFAULT 'pending',
            not_before TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((action_id IS NULL) != (campaign_id IS NULL))
        );

        CREATE TABLE emails (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            action_id TEXT,
            campaign_id TEXT,
            created_at TEXT NOT NULL
        );
        ",
    )?;
    record_migration(conn, 1, "initial_schema")
}

/// V2: Indexes for the hot dispatcher queries (claim scan, campaign counts).
fn migrate_v2_dispatch_indexes(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE INDEX idx_tasks_status_not_before ON tasks(status, not_before);
        CREATE INDEX idx_tasks_campaign_status ON tasks(campaign_id, status);
        CREATE INDEX idx_contact_triggers_contact ON contact_triggers(contact_id);
        CREATE INDEX idx_emails_contact ON emails(contact_id);
        ",
    )?;
    record_migration(conn, 2, "dispatch_indexes")
}
