//! HeyGen personalised-video adapter.

use crate::error::{CoreError, CoreResult};
use crate::providers::VideoProvider;
use crate::reliability::Remote;
use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

const DEFAULT_BASE_URL: &str = "https://api.heygen.com/v2";

/// HeyGen adapter.
pub struct HeyGenVideo {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    remote: Remote,
}

impl HeyGenVideo {
    /// Build the adapter.
    #[must_use]
    pub fn new(api_key: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            remote,
        }
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Breaker state, surfaced through health checks.
    #[must_use]
    pub fn breaker_state(&self) -> crate::reliability::BreakerState {
        self.remote.breaker_state()
    }
}

#[async_trait]
impl VideoProvider for HeyGenVideo {
    fn name(&self) -> &'static str {
        "heygen"
    }

    #[instrument(skip_all)]
    async fn generate_video(&self, script: &str, persona: &str) -> CoreResult<String> {
        let body = json!({
            "video_inputs": [{
                "character": { "type": "avatar", "avatar_id": persona },
                "voice": { "type": "text", "input_text": script },
            }],
        });
        let payload = self
            .remote
            .call("generate_video", || async {
                let response = self
                    .http
                    .post(format!("{}/video/generate", self.base_url))
                    .header("X-Api-Key", &self.api_key)
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(CoreError::from_status(status.as_u16(), detail));
                }
                Ok(response.json::<serde_json::Value>().await?)
            })
            .await?;
        payload
            .get("data")
            .and_then(|d| d.get("video_id"))
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "heygen response missing video_id".to_string(),
            })
    }
}
