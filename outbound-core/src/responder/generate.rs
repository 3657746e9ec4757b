//! The opaque reply-generation dependency.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::json;

/// Generates reply text from a system prompt and a user prompt.
///
/// The model behind this is an external service; the responder only relies
/// on `generate(system, user) -> text`.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply.
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> CoreResult<String>;
}

/// HTTP-backed generator for a completion-style endpoint.
pub struct HttpReplyGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpReplyGenerator {
    /// Build the generator.
    #[must_use]
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> CoreResult<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "system": system_prompt,
                "prompt": user_prompt,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::from_status(status.as_u16(), detail));
        }
        let payload: serde_json::Value = response.json().await?;
        payload
            .get("text")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "generator response missing text".to_string(),
            })
    }
}
