//! Content resolution: subject/body, sender, footer.

use crate::merge;
use crate::RenderError;
use maildrop_core::{Contact, Project, TaskContent, TemplateKind};

const UNSUBSCRIBE_FOOTER_TEXT: &str =
    "\n\n--\nYou received this email because you are subscribed to these updates. \
     Reply with \"unsubscribe\" to stop receiving them.";

const UNSUBSCRIBE_FOOTER_HTML: &str = "<br/><hr/>\
     <p style=\"font-size:12px;color:#666666\">You received this email because you are \
     subscribed to these updates. Reply with \"unsubscribe\" to stop receiving them.</p>";

/// A fully resolved email, ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub from_email: String,
    pub is_html: bool,
    /// Whether the mandatory unsubscribe footer was appended.
    pub include_unsubscribe: bool,
}

impl RenderedEmail {
    /// RFC 5322 From header value: `Name <addr>` when a name is present.
    pub fn from_header(&self) -> String {
        match &self.from_name {
            Some(name) => format!("{} <{}>", name, self.from_email),
            None => self.from_email.clone(),
        }
    }
}

/// Render a task's content for one contact.
///
/// Sender resolution: the content's own sender address is honored only when
/// the project's domain is verified; otherwise the project default applies.
/// Campaigns and marketing templates always get the unsubscribe footer,
/// transactional templates never do.
pub fn render(
    content: &TaskContent,
    contact: &Contact,
    project: &Project,
) -> Result<RenderedEmail, RenderError> {
    let (subject_src, body_src, from_name_src, sender_email_src, is_html, include_unsubscribe) =
        match content {
            TaskContent::Action { template, .. } => (
                template.subject.as_str(),
                template.body.as_str(),
                template.from_name.as_deref(),
                template.sender_email.as_deref(),
                template.is_html,
                template.kind == TemplateKind::Marketing,
            ),
            TaskContent::Campaign(campaign) => (
                campaign.subject.as_str(),
                campaign.body.as_str(),
                campaign.from_name.as_deref(),
                campaign.sender_email.as_deref(),
                campaign.is_html,
                true,
            ),
        };

    if subject_src.trim().is_empty() {
        return Err(RenderError::MissingField("subject"));
    }
    if body_src.trim().is_empty() {
        return Err(RenderError::MissingField("body"));
    }

    let from_email = resolve_from_email(sender_email_src, project)?;
    let from_name = from_name_src
        .map(str::to_string)
        .or_else(|| project.default_from_name.clone());

    let subject = merge::substitute(subject_src, contact);
    let mut body = merge::substitute(body_src, contact);
    if include_unsubscribe {
        body.push_str(if is_html {
            UNSUBSCRIBE_FOOTER_HTML
        } else {
            UNSUBSCRIBE_FOOTER_TEXT
        });
    }

    Ok(RenderedEmail {
        subject,
        body,
        from_name,
        from_email,
        is_html,
        include_unsubscribe,
    })
}

fn resolve_from_email(
    sender_email: Option<&str>,
    project: &Project,
) -> Result<String, RenderError> {
    let resolved = match sender_email {
        // Custom sender addresses only apply on a verified domain
        Some(addr) if project.verified_domain && !addr.trim().is_empty() => addr.to_string(),
        _ => project.default_sender_email.clone(),
    };
    if resolved.trim().is_empty() {
        return Err(RenderError::MissingField("from_email"));
    }
    Ok(resolved)
}
