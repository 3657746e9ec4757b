//! LinkedIn provider adapters.
//!
//! PhantomBuster (primary) launches automation agents; Lemlist (secondary)
//! queues LinkedIn steps through its multichannel API. Per-account daily
//! ceilings are owned by the provider side.

use crate::error::{CoreError, CoreResult};
use crate::model::{EventType, NormalizedEvent};
use crate::providers::webhook::stable_event_id;
use crate::providers::{LinkedInProvider, LinkedInRequest, SendReceipt};
use crate::reliability::Remote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

const PHANTOMBUSTER_BASE_URL: &str = "https://api.phantombuster.com/api/v2";
const LEMLIST_BASE_URL: &str = "https://api.lemlist.com/api";

/// PhantomBuster adapter, the primary LinkedIn channel.
pub struct PhantomBusterLinkedIn {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    agent_id: String,
    remote: Remote,
}

impl PhantomBusterLinkedIn {
    /// Build the adapter; `agent_id` selects the automation agent to launch.
    #[must_use]
    pub fn new(api_key: &str, agent_id: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: PHANTOMBUSTER_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
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

    async fn launch(&self, action: &str, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        let body = json!({
            "id": self.agent_id,
            "argument": {
                "action": action,
                "profileUrl": request.profile_url,
                "message": request.message,
            },
        });
        let payload = self
            .remote
            .call(action, || async {
                let response = self
                    .http
                    .post(format!("{}/agents/launch", self.base_url))
                    .header("X-Phantombuster-Key", &self.api_key)
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
        let container = payload
            .get("containerId")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "phantombuster response missing containerId".to_string(),
            })?;
        Ok(SendReceipt {
            provider_message_id: container.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl LinkedInProvider for PhantomBusterLinkedIn {
    fn name(&self) -> &'static str {
        "phantombuster"
    }

    #[instrument(skip_all, fields(profile = %request.profile_url))]
    async fn send_connection_request(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.launch("connect", request).await
    }

    #[instrument(skip_all, fields(profile = %request.profile_url))]
    async fn send_message(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.launch("message", request).await
    }
}

/// Parse a PhantomBuster webhook into a normalised event.
///
/// PhantomBuster reports agent results; the only lifecycle event surfaced
/// from LinkedIn automation is a reply.
///
/// # Errors
///
/// Returns a validation error for unparseable payloads.
pub fn parse_phantombuster_webhook(raw: &[u8]) -> CoreResult<NormalizedEvent> {
    let payload: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| CoreError::validation(format!("malformed phantombuster webhook: {e}")))?;

    let result = payload
        .get("resultObject")
        .ok_or_else(|| CoreError::validation("phantombuster webhook missing resultObject"))?;
    let email = result
        .get("email")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::validation("phantombuster result missing email"))?;
    let occurred_at = payload
        .get("finishedAt")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    let mut event = NormalizedEvent::new(EventType::Replied, "phantombuster", email, occurred_at);
    event.id = stable_event_id(
        "phantombuster",
        payload
            .get("containerId")
            .and_then(serde_json::Value::as_str),
    );
    if let Some(container) = payload
        .get("containerId")
        .and_then(serde_json::Value::as_str)
    {
        event = event.with_message_id(container);
    }
    if let Some(campaign) = result
        .get("campaignId")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
    {
        event = event.with_campaign(campaign);
    }
    let body = result
        .get("replyText")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    event = event.with_reply(None, body);
    Ok(event.with_raw(payload))
}

/// Lemlist LinkedIn-steps adapter, the secondary channel.
pub struct LemlistLinkedIn {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    remote: Remote,
}

impl LemlistLinkedIn {
    /// Build the adapter.
    #[must_use]
    pub fn new(api_key: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: LEMLIST_BASE_URL.to_string(),
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

    async fn queue_step(&self, step: &str, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        let body = json!({
            "step": step,
            "profileUrl": request.profile_url,
            "message": request.message,
        });
        let payload = self
            .remote
            .call(step, || async {
                let response = self
                    .http
                    .post(format!("{}/linkedin/steps", self.base_url))
                    .basic_auth("", Some(&self.api_key))
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
        let id = payload
            .get("_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "lemlist response missing _id".to_string(),
            })?;
        Ok(SendReceipt {
            provider_message_id: id.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl LinkedInProvider for LemlistLinkedIn {
    fn name(&self) -> &'static str {
        "lemlist-linkedin"
    }

    async fn send_connection_request(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.queue_step("linkedinInvite", request).await
    }

    async fn send_message(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.queue_step("linkedinMessage", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_phantombuster_reply() {
        let campaign = uuid::Uuid::new_v4();
        let raw = serde_json::to_vec(&json!({
            "containerId": "cont-1",
            "finishedAt": "2026-03-02T08:00:00Z",
            "resultObject": {
                "email": "carol@ex.com",
                "campaignId": campaign.to_string(),
                "replyText": "happy to connect",
            },
        }))
        .expect("json");
        let event = parse_phantombuster_webhook(&raw).expect("parse");
        assert_eq!(event.event_type, EventType::Replied);
        assert_eq!(event.email, "carol@ex.com");
        assert_eq!(event.campaign_id, Some(campaign));
        assert_eq!(event.reply.expect("reply").body, "happy to connect");
    }

    #[test]
    fn missing_result_object_is_rejected() {
        let raw = serde_json::to_vec(&json!({"containerId": "cont-1"})).expect("json");
        assert!(parse_phantombuster_webhook(&raw).is_err());
    }
}
