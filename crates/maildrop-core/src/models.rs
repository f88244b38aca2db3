//! Domain model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status - the delivery state machine.
///
/// Transitions are forward-only: `Pending -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// A terminal status is never updated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Campaign status. `Delivered` is terminal and entered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Delivered,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sending => "sending",
            Self::Delivered => "delivered",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "delivered" => Self::Delivered,
            _ => Self::Draft,
        }
    }
}

/// Template kind. Marketing templates carry a mandatory unsubscribe footer;
/// transactional templates do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Marketing,
    Transactional,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketing => "marketing",
            Self::Transactional => "transactional",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "transactional" => Self::Transactional,
            _ => Self::Marketing,
        }
    }
}

/// What a task delivers: exactly one of an action or a campaign.
///
/// The database row keeps two nullable foreign keys with a CHECK constraint;
/// row mapping converts to this enum so downstream dispatch is exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum TaskOrigin {
    Action { action_id: String },
    Campaign { campaign_id: String },
}

impl TaskOrigin {
    pub fn action_id(&self) -> Option<&str> {
        match self {
            Self::Action { action_id } => Some(action_id),
            Self::Campaign { .. } => None,
        }
    }

    pub fn campaign_id(&self) -> Option<&str> {
        match self {
            Self::Action { .. } => None,
            Self::Campaign { campaign_id } => Some(campaign_id),
        }
    }
}

/// Task record - one scheduled unit of email delivery work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub contact_id: String,
    pub origin: TaskOrigin,
    pub status: TaskStatus,
    /// Eligibility timestamp: the task is claimable once this has passed.
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Action - an automation rule: a template plus suppression conditions.
/// Read-only from the dispatcher's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub template_id: String,
    /// Event ids that, if already triggered by the contact, cancel the send.
    pub suppression_events: Vec<String>,
}

/// Template - reusable subject/body content for an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub project_id: String,
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub sender_email: Option<String>,
    pub is_html: bool,
    pub kind: TemplateKind,
}

/// Campaign - a one-time broadcast to a recipient set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub project_id: String,
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub sender_email: Option<String>,
    pub is_html: bool,
    pub status: CampaignStatus,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Contact - an address plus arbitrary merge-field metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub project_id: String,
    pub email: String,
    /// Opaque key/value blob used for merge-field substitution.
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub subscribed: bool,
}

/// Project - the tenant boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub verified_domain: bool,
    pub default_from_name: Option<String>,
    pub default_sender_email: String,
}

/// A contact-triggered event, used for action suppression checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactTrigger {
    pub event_id: String,
    pub contact_id: String,
}

/// Email receipt - an immutable record of one successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailReceipt {
    pub id: String,
    /// Message id returned by the mail transport.
    pub message_id: String,
    pub contact_id: String,
    pub action_id: Option<String>,
    pub campaign_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New email receipt, before insertion.
#[derive(Debug, Clone)]
pub struct NewEmailReceipt {
    pub id: String,
    pub message_id: String,
    pub contact_id: String,
    pub action_id: Option<String>,
    pub campaign_id: Option<String>,
}

/// Resolved content for a claimed task: the action's template or the campaign.
#[derive(Debug, Clone)]
pub enum TaskContent {
    Action { action: Action, template: Template },
    Campaign(Campaign),
}

impl TaskContent {
    /// Suppression events attached to this content (empty for campaigns).
    pub fn suppression_events(&self) -> &[String] {
        match self {
            Self::Action { action, .. } => &action.suppression_events,
            Self::Campaign(_) => &[],
        }
    }
}

/// A claimed task with its joins resolved, ready for processing.
#[derive(Debug, Clone)]
pub struct EligibleTask {
    pub task: Task,
    pub contact: Contact,
    pub content: TaskContent,
}

/// Outbound email handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Receipt returned by the mail transport on a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Sending,
            CampaignStatus::Delivered,
        ] {
            assert_eq!(CampaignStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_task_origin_accessors() {
        let action = TaskOrigin::Action {
            action_id: "action-1".to_string(),
        };
        assert_eq!(action.action_id(), Some("action-1"));
        assert!(action.campaign_id().is_none());

        let campaign = TaskOrigin::Campaign {
            campaign_id: "campaign-1".to_string(),
        };
        assert!(campaign.action_id().is_none());
        assert_eq!(campaign.campaign_id(), Some("campaign-1"));
    }

    #[test]
    fn test_campaign_content_has_no_suppression_events() {
        let content = TaskContent::Campaign(Campaign {
            id: "campaign-1".to_string(),
            project_id: "project-1".to_string(),
            subject: "Hello".to_string(),
            body: "World".to_string(),
            from_name: None,
            sender_email: None,
            is_html: false,
            status: CampaignStatus::Sending,
            delivered_at: None,
        });
        assert!(content.suppression_events().is_empty());
    }
}
