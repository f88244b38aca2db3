//! Insert-side row types.
//!
//! Read-side domain types live in `maildrop-core`; these are the `New*`
//! structs upstream code (event/campaign triggers, project provisioning)
//! passes to the insert helpers.

use maildrop_core::{TaskOrigin, TemplateKind};

/// New project row.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub id: String,
    pub name: String,
    pub verified_domain: bool,
    pub default_from_name: Option<String>,
    pub default_sender_email: String,
}

/// New contact row.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub id: String,
    pub project_id: String,
    pub email: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub subscribed: bool,
}

/// New template row.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub id: String,
    pub project_id: String,
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub sender_email: Option<String>,
    pub is_html: bool,
    pub kind: TemplateKind,
}

/// New action row, with its suppression events.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub id: String,
    pub template_id: String,
    pub suppression_events: Vec<String>,
}

/// New campaign row.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub id: String,
    pub project_id: String,
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub sender_email: Option<String>,
    pub is_html: bool,
}

/// New task row. Status starts at `pending`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub contact_id: String,
    pub origin: TaskOrigin,
    /// Eligibility timestamp; pass `Utc::now()` for immediately-due tasks.
    pub not_before: chrono::DateTime<chrono::Utc>,
}
