//! HubSpot CRM adapter.

use crate::error::{CoreError, CoreResult};
use crate::model::Contact;
use crate::providers::CrmProvider;
use crate::reliability::Remote;
use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

/// Maximum contacts per CRM batch upsert.
pub const MAX_CRM_BATCH: usize = 100;

/// HubSpot adapter.
pub struct HubSpotCrm {
    http: reqwest::Client,
    base_url: String,
    token: String,
    remote: Remote,
}

impl HubSpotCrm {
    /// Build the adapter with a private-app token.
    #[must_use]
    pub fn new(token: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.to_string(),
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

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> CoreResult<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::from_status(status.as_u16(), detail));
        }
        Ok(response.json().await?)
    }

    fn properties_for(contact: &Contact) -> serde_json::Value {
        json!({
            "email": contact.email,
            "firstname": contact.name,
            "jobtitle": contact.title,
            "company": contact.company,
            "phone": contact.phone,
            "linkedin_url": contact.linkedin_url,
            "data_quality_score": contact.data_quality_score,
        })
    }
}

#[async_trait]
impl CrmProvider for HubSpotCrm {
    fn name(&self) -> &'static str {
        "hubspot"
    }

    #[instrument(skip_all, fields(email = %contact.email))]
    async fn upsert_contact(&self, contact: &Contact) -> CoreResult<String> {
        let body = json!({
            "inputs": [{
                "id": contact.email,
                "idProperty": "email",
                "properties": Self::properties_for(contact),
            }],
        });
        let payload = self
            .remote
            .call("upsert_contact", || {
                self.post_json("/crm/v3/objects/contacts/batch/upsert", &body)
            })
            .await?;
        payload
            .get("results")
            .and_then(serde_json::Value::as_array)
            .and_then(|r| r.first())
            .and_then(|r| r.get("id"))
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "hubspot upsert response missing id".to_string(),
            })
    }

    async fn upsert_batch(&self, contacts: &[Contact]) -> CoreResult<Vec<CoreResult<String>>> {
        if contacts.len() > MAX_CRM_BATCH {
            return Err(CoreError::validation(format!(
                "crm batch of {} exceeds the {MAX_CRM_BATCH}-contact limit",
                contacts.len()
            )));
        }
        let inputs: Vec<_> = contacts
            .iter()
            .map(|c| {
                json!({
                    "id": c.email,
                    "idProperty": "email",
                    "properties": Self::properties_for(c),
                })
            })
            .collect();
        let body = json!({ "inputs": inputs });
        let payload = self
            .remote
            .call("upsert_batch", || {
                self.post_json("/crm/v3/objects/contacts/batch/upsert", &body)
            })
            .await?;

        // HubSpot reports per-item results keyed by email; items absent from
        // `results` failed.
        let results = payload
            .get("results")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        let outcome = contacts
            .iter()
            .map(|contact| {
                results
                    .iter()
                    .find(|r| {
                        r.get("properties")
                            .and_then(|p| p.get("email"))
                            .and_then(serde_json::Value::as_str)
                            .is_some_and(|email| email == contact.email)
                    })
                    .and_then(|r| r.get("id"))
                    .and_then(serde_json::Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| CoreError::PermanentRemote {
                        status: 422,
                        detail: format!("hubspot rejected {}", contact.email),
                    })
            })
            .collect();
        Ok(outcome)
    }

    async fn log_activity(&self, external_id: &str, note: &str) -> CoreResult<()> {
        let body = json!({
            "properties": { "hs_note_body": note },
            "associations": [{
                "to": { "id": external_id },
                "types": [{
                    "associationCategory": "HUBSPOT_DEFINED",
                    "associationTypeId": 202,
                }],
            }],
        });
        self.remote
            .call("log_activity", || {
                self.post_json("/crm/v3/objects/notes", &body)
            })
            .await?;
        Ok(())
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<serde_json::Value>> {
        let body = json!({
            "query": query,
            "limit": 20,
        });
        let payload = self
            .remote
            .call("search", || {
                self.post_json("/crm/v3/objects/contacts/search", &body)
            })
            .await?;
        Ok(payload
            .get("results")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
