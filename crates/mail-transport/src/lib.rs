//! HTTP mail transport.
//!
//! Implements the `MailTransport` port against an SES-like JSON send API:
//! one POST per email, bearer-authenticated, no client-side retry (a failed
//! send marks the task failed; redelivery is an upstream decision).

use async_trait::async_trait;
use maildrop_core::{MailTransport, OutboundEmail, SendReceipt, TransportError, TransportResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Mailer configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Base URL for the send API.
    pub api_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://mail.maildrop.dev".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Request payload for one send.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Response from the send API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailResponse {
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the send API.
pub struct HttpMailer {
    config: MailerConfig,
    client: Client,
    auth_token: String,
}

impl HttpMailer {
    /// Create a new mailer.
    pub fn new(config: MailerConfig, auth_token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            auth_token: auth_token.to_string(),
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailer {
    async fn send(&self, email: OutboundEmail) -> TransportResult<SendReceipt> {
        let url = format!("{}/v1/email", self.config.api_url);

        let request = SendEmailRequest {
            from: &email.from,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
        };

        debug!(url = %url, to = %email.to, "Sending email");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let result: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        if !result.success {
            return Err(TransportError::Rejected(
                result.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let message_id = result
            .message_id
            .ok_or_else(|| TransportError::Protocol("Response missing messageId".to_string()))?;

        debug!(to = %email.to, message_id = %message_id, "Email accepted");

        Ok(SendReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailer_config_default() {
        let config = MailerConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.api_url, "https://mail.maildrop.dev");
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = SendEmailRequest {
            from: "Acme <hello@acme.test>",
            to: "ada@example.test",
            subject: "Welcome",
            html: "<p>Hi</p>",
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["from"], "Acme <hello@acme.test>");
        assert_eq!(json["to"], "ada@example.test");
        assert_eq!(json["subject"], "Welcome");
        assert_eq!(json["html"], "<p>Hi</p>");
    }

    #[test]
    fn test_response_deserializes_camel_case() {
        let response: SendEmailResponse =
            serde_json::from_str(r#"{"success":true,"messageId":"msg-123"}"#).unwrap();
        assert!(response.success);
        assert_eq!(response.message_id.as_deref(), Some("msg-123"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_response_with_error() {
        let response: SendEmailResponse =
            serde_json::from_str(r#"{"success":false,"error":"address suppressed"}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("address suppressed"));
    }
}
