//! Console email adapter for development.
//!
//! Logs messages instead of sending them. Substituted automatically when no
//! provider key is configured, so a fresh checkout runs end-to-end.

use crate::error::CoreResult;
use crate::providers::{validate_batch, EmailMessage, EmailProvider, SendReceipt};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Development email backend.
#[derive(Debug, Clone, Default)]
pub struct ConsoleEmail;

impl ConsoleEmail {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn receipt() -> SendReceipt {
        SendReceipt {
            provider_message_id: format!("console-{}", Uuid::new_v4()),
            provider: "console".to_string(),
        }
    }
}

#[async_trait]
impl EmailProvider for ConsoleEmail {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        info!(
            to = %message.to,
            subject = %message.subject,
            has_html = message.body_html.is_some(),
            "console email sent"
        );
        Ok(Self::receipt())
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        validate_batch(messages)?;
        info!(count = messages.len(), "console email batch sent");
        Ok(messages.iter().map(|_| Self::receipt()).collect())
    }

    async fn send_template(
        &self,
        template_id: &str,
        _model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        info!(to = %to, template = %template_id, "console template email sent");
        Ok(Self::receipt())
    }
}
