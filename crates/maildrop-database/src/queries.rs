//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter so the same SQL
//! serves the sync `Database` wrapper and the async executor.

use crate::{
    DatabaseError, DatabaseResult, NewAction, NewCampaign, NewContact, NewProject, NewTask,
    NewTemplate,
};
use chrono::{DateTime, Utc};
use maildrop_core::{
    Action, Campaign, CampaignStatus, Contact, ContactTrigger, EligibleTask, NewEmailReceipt,
    Project, Task, TaskContent, TaskOrigin, TaskStatus, Template, TemplateKind,
};
use rusqlite::{params, Connection};
use tracing::warn;

// ==========================================
// Projects
// ==========================================

/// Insert a new project.
pub fn insert_project(conn: &Connection, project: &NewProject) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO projects (id, name, verified_domain, default_from_name, default_sender_email, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            project.id,
            project.name,
            project.verified_domain,
            project.default_from_name,
            project.default_sender_email,
            now,
        ],
    )?;
    Ok(())
}

/// Get a project by ID.
pub fn get_project(conn: &Connection, id: &str) -> DatabaseResult<Option<Project>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, verified_domain, default_from_name, default_sender_email
         FROM projects WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            verified_domain: row.get(2)?,
            default_from_name: row.get(3)?,
            default_sender_email: row.get(4)?,
        })
    });

    match result {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete a project by ID. Contacts and tasks are cleaned up separately by
/// the dispatcher's project-vanish handling.
pub fn delete_project(conn: &Connection, id: &str) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

// ==========================================
// Contacts
// ==========================================

/// Insert a new contact.
pub fn insert_contact(conn: &Connection, contact: &NewContact) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    let fields = serde_json::to_string(&contact.fields)?;
    conn.execute(
        "INSERT INTO contacts (id, project_id, email, fields, subscribed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            contact.id,
            contact.project_id,
            contact.email,
            fields,
            contact.subscribed,
            now,
        ],
    )?;
    Ok(())
}

/// Get a contact by ID.
pub fn get_contact(conn: &Connection, id: &str) -> DatabaseResult<Option<Contact>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, project_id, email, fields, subscribed FROM contacts WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok(Contact {
            id: row.get(0)?,
            project_id: row.get(1)?,
            email: row.get(2)?,
            fields: parse_fields(row.get::<_, String>(3)?),
            subscribed: row.get(4)?,
        })
    });

    match result {
        Ok(contact) => Ok(Some(contact)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Record a triggered event for a contact. Duplicate triggers are ignored.
pub fn insert_contact_trigger(
    conn: &Connection,
    event_id: &str,
    contact_id: &str,
) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO contact_triggers (event_id, contact_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![event_id, contact_id, now],
    )?;
    Ok(())
}

/// List all events a contact has triggered.
pub fn triggers_for_contact(
    conn: &Connection,
    contact_id: &str,
) -> DatabaseResult<Vec<ContactTrigger>> {
    let mut stmt = conn.prepare_cached(
        "SELECT event_id, contact_id FROM contact_triggers WHERE contact_id = ?1",
    )?;

    let triggers = stmt
        .query_map(params![contact_id], |row| {
            Ok(ContactTrigger {
                event_id: row.get(0)?,
                contact_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(triggers)
}

// ==========================================
// Templates and actions
// ==========================================

/// Insert a new template.
pub fn insert_template(conn: &Connection, template: &NewTemplate) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO templates (id, project_id, subject, body, from_name, sender_email, is_html, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            template.id,
            template.project_id,
            template.subject,
            template.body,
            template.from_name,
            template.sender_email,
            template.is_html,
            template.kind.as_str(),
            now,
        ],
    )?;
    Ok(())
}

/// Insert a new action with its suppression events.
pub fn insert_action(conn: &Connection, action: &NewAction) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO actions (id, template_id, created_at) VALUES (?1, ?2, ?3)",
        params![action.id, action.template_id, now],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO action_suppressions (action_id, event_id) VALUES (?1, ?2)",
    )?;
    for event_id in &action.suppression_events {
        stmt.execute(params![action.id, event_id])?;
    }
    Ok(())
}

// ==========================================
// Campaigns
// ==========================================

/// Insert a new campaign in draft status.
pub fn insert_campaign(conn: &Connection, campaign: &NewCampaign) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO campaigns (id, project_id, subject, body, from_name, sender_email, is_html, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8, ?8)",
        params![
            campaign.id,
            campaign.project_id,
            campaign.subject,
            campaign.body,
            campaign.from_name,
            campaign.sender_email,
            campaign.is_html,
            now,
        ],
    )?;
    Ok(())
}

/// Get a campaign by ID.
pub fn get_campaign(conn: &Connection, id: &str) -> DatabaseResult<Option<Campaign>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, project_id, subject, body, from_name, sender_email, is_html, status, delivered_at
         FROM campaigns WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok(Campaign {
            id: row.get(0)?,
            project_id: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            from_name: row.get(4)?,
            sender_email: row.get(5)?,
            is_html: row.get(6)?,
            status: CampaignStatus::from_str(&row.get::<_, String>(7)?),
            delivered_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
        })
    });

    match result {
        Ok(campaign) => Ok(Some(campaign)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Update a campaign's status (draft -> sending, performed by upstream
/// campaign-trigger logic when tasks are enqueued).
pub fn update_campaign_status(
    conn: &Connection,
    id: &str,
    status: CampaignStatus,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(count > 0)
}

/// Set a campaign to delivered with the given timestamp.
///
/// The status guard makes this idempotent: an already-delivered campaign is
/// untouched (returns false) and its delivered timestamp never changes.
pub fn mark_campaign_delivered(
    conn: &Connection,
    id: &str,
    delivered_at: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE campaigns SET status = 'delivered', delivered_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status != 'delivered'",
        params![id, delivered_at.to_rfc3339()],
    )?;
    Ok(count > 0)
}

// ==========================================
// Tasks
// ==========================================

/// Insert a new pending task.
pub fn insert_task(conn: &Connection, task: &NewTask) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tasks (id, contact_id, action_id, campaign_id, status, not_before, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)",
        params![
            task.id,
            task.contact_id,
            task.origin.action_id(),
            task.origin.campaign_id(),
            task.not_before.to_rfc3339(),
            now,
        ],
    )?;
    Ok(())
}

/// Get a task by ID.
pub fn get_task(conn: &Connection, id: &str) -> DatabaseResult<Option<Task>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, contact_id, action_id, campaign_id, status, not_before, created_at
         FROM tasks WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    });

    let (id, contact_id, action_id, campaign_id, status, not_before, created_at) = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let origin = task_origin(&id, action_id, campaign_id)?;
    Ok(Some(Task {
        id,
        contact_id,
        origin,
        status: TaskStatus::from_str(&status),
        not_before: parse_datetime(not_before),
        created_at: parse_datetime(created_at),
    }))
}

/// Update one task's status. Returns whether a row changed.
pub fn update_task_status(
    conn: &Connection,
    task_id: &str,
    status: TaskStatus,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, task_id],
    )?;
    Ok(count > 0)
}

/// Claim one pending task for processing.
///
/// The status guard makes the claim exclusive: when two dispatcher
/// invocations list the same pending task, only the first UPDATE matches a
/// row and the loser sees `false`.
pub fn claim_task(conn: &Connection, task_id: &str) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE tasks SET status = 'processing', updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![now, task_id],
    )?;
    Ok(count > 0)
}

/// Mark every non-terminal task of a project failed, then delete them.
///
/// Used when the owning project has vanished mid-flight: the tasks can never
/// be sent, so they are terminally failed and removed in one transaction.
/// Returns the number of tasks removed.
pub fn bulk_fail_and_delete_project_tasks(
    conn: &Connection,
    project_id: &str,
) -> DatabaseResult<u64> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().to_rfc3339();

    tx.execute(
        "UPDATE tasks SET status = 'failed', updated_at = ?1
         WHERE status IN ('pending', 'processing')
           AND contact_id IN (SELECT id FROM contacts WHERE project_id = ?2)",
        params![now, project_id],
    )?;
    let deleted = tx.execute(
        "DELETE FROM tasks
         WHERE status = 'failed'
           AND contact_id IN (SELECT id FROM contacts WHERE project_id = ?1)",
        params![project_id],
    )?;

    tx.commit()?;
    Ok(deleted as u64)
}

/// Count tasks for a campaign in the given status.
pub fn count_tasks_by_campaign_and_status(
    conn: &Connection,
    campaign_id: &str,
    status: TaskStatus,
) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE campaign_id = ?1 AND status = ?2",
        params![campaign_id, status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Claim up to `limit` eligible pending tasks, oldest eligible first, with
/// contact, action/template and campaign joined in.
///
/// Rows that cannot be resolved into a valid origin (should be impossible
/// under the schema CHECK, but legacy data happens) are logged and skipped
/// rather than failing the whole claim.
pub fn list_eligible_tasks(conn: &Connection, limit: u64) -> DatabaseResult<Vec<EligibleTask>> {
    let now = Utc::now().to_rfc3339();

    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.contact_id, t.action_id, t.campaign_id, t.status, t.not_before, t.created_at,
                c.project_id, c.email, c.fields, c.subscribed,
                a.template_id,
                tp.project_id, tp.subject, tp.body, tp.from_name, tp.sender_email, tp.is_html, tp.kind,
                cp.project_id, cp.subject, cp.body, cp.from_name, cp.sender_email, cp.is_html, cp.status, cp.delivered_at
         FROM tasks t
         JOIN contacts c ON c.id = t.contact_id
         LEFT JOIN actions a ON a.id = t.action_id
         LEFT JOIN templates tp ON tp.id = a.template_id
         LEFT JOIN campaigns cp ON cp.id = t.campaign_id
         WHERE t.status = 'pending' AND t.not_before <= ?1
         ORDER BY t.not_before ASC, t.created_at ASC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![now, limit as i64], |row| {
            let task_id: String = row.get(0)?;
            let contact_id: String = row.get(1)?;
            let action_id: Option<String> = row.get(2)?;
            let campaign_id: Option<String> = row.get(3)?;
            let status: String = row.get(4)?;
            let not_before: String = row.get(5)?;
            let created_at: String = row.get(6)?;

            let contact = Contact {
                id: contact_id.clone(),
                project_id: row.get(7)?,
                email: row.get(8)?,
                fields: parse_fields(row.get::<_, String>(9)?),
                subscribed: row.get(10)?,
            };

            let content = match (&action_id, &campaign_id) {
                (Some(aid), None) => {
                    let template_id: Option<String> = row.get(11)?;
                    match template_id {
                        Some(template_id) => Some(TaskContent::Action {
                            action: Action {
                                id: aid.clone(),
                                template_id: template_id.clone(),
                                // filled in below, outside the row closure
                                suppression_events: Vec::new(),
                            },
                            template: Template {
                                id: template_id,
                                project_id: row.get(12)?,
                                subject: row.get(13)?,
                                body: row.get(14)?,
                                from_name: row.get(15)?,
                                sender_email: row.get(16)?,
                                is_html: row.get(17)?,
                                kind: TemplateKind::from_str(&row.get::<_, String>(18)?),
                            },
                        }),
                        None => None,
                    }
                }
                (None, Some(cid)) => {
                    let project_id: Option<String> = row.get(19)?;
                    match project_id {
                        Some(project_id) => Some(TaskContent::Campaign(Campaign {
                            id: cid.clone(),
                            project_id,
                            subject: row.get(20)?,
                            body: row.get(21)?,
                            from_name: row.get(22)?,
                            sender_email: row.get(23)?,
                            is_html: row.get(24)?,
                            status: CampaignStatus::from_str(&row.get::<_, String>(25)?),
                            delivered_at: row.get::<_, Option<String>>(26)?.map(parse_datetime),
                        })),
                        None => None,
                    }
                }
                _ => None,
            };

            Ok((
                task_id,
                contact_id,
                action_id,
                campaign_id,
                status,
                not_before,
                created_at,
                contact,
                content,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut suppression_stmt = conn
        .prepare_cached("SELECT event_id FROM action_suppressions WHERE action_id = ?1")?;

    let mut eligible = Vec::with_capacity(rows.len());
    for (task_id, contact_id, action_id, campaign_id, status, not_before, created_at, contact, content) in
        rows
    {
        let origin = match task_origin(&task_id, action_id, campaign_id) {
            Ok(origin) => origin,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Skipping task with invalid origin");
                continue;
            }
        };
        let Some(mut content) = content else {
            warn!(task_id = %task_id, "Skipping task with unresolvable content joins");
            continue;
        };

        if let TaskContent::Action { action, .. } = &mut content {
            action.suppression_events = suppression_stmt
                .query_map(params![action.id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
        }

        eligible.push(EligibleTask {
            task: Task {
                id: task_id,
                contact_id,
                origin,
                status: TaskStatus::from_str(&status),
                not_before: parse_datetime(not_before),
                created_at: parse_datetime(created_at),
            },
            contact,
            content,
        });
    }

    Ok(eligible)
}

// ==========================================
// Email receipts
// ==========================================

/// Insert an email receipt. Receipts are immutable; there is no update path.
pub fn insert_email(conn: &Connection, receipt: &NewEmailReceipt) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO emails (id, message_id, contact_id, action_id, campaign_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            receipt.id,
            receipt.message_id,
            receipt.contact_id,
            receipt.action_id,
            receipt.campaign_id,
            now,
        ],
    )?;
    Ok(())
}

/// Count all email receipts.
pub fn count_emails(conn: &Connection) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Count email receipts for one contact.
pub fn count_emails_for_contact(conn: &Connection, contact_id: &str) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM emails WHERE contact_id = ?1",
        params![contact_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

// ==========================================
// Row mapping helpers
// ==========================================

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a contact metadata JSON blob, falling back to empty on error.
fn parse_fields(s: String) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(&s).unwrap_or_default()
}

fn task_origin(
    task_id: &str,
    action_id: Option<String>,
    campaign_id: Option<String>,
) -> DatabaseResult<TaskOrigin> {
    match (action_id, campaign_id) {
        (Some(action_id), None) => Ok(TaskOrigin::Action { action_id }),
        (None, Some(campaign_id)) => Ok(TaskOrigin::Campaign { campaign_id }),
        _ => Err(DatabaseError::InvalidData(format!(
            "task {task_id} must reference exactly one of action/campaign"
        ))),
    }
}
