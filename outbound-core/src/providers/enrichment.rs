//! Explorium enrichment adapter.

use crate::error::{CoreError, CoreResult};
use crate::providers::EnrichmentProvider;
use crate::reliability::Remote;
use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

const DEFAULT_BASE_URL: &str = "https://api.explorium.ai/v1";

/// Explorium adapter.
pub struct ExploriumEnrichment {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    remote: Remote,
}

impl ExploriumEnrichment {
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

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> CoreResult<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("api_key", &self.api_key)
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
}

#[async_trait]
impl EnrichmentProvider for ExploriumEnrichment {
    fn name(&self) -> &'static str {
        "explorium"
    }

    #[instrument(skip(self))]
    async fn enrich_contact(&self, email: &str) -> CoreResult<serde_json::Value> {
        let body = json!({ "email": email });
        self.remote
            .call("enrich_contact", || {
                self.post_json("/contacts/enrich", &body)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn enrich_company(&self, domain: &str) -> CoreResult<serde_json::Value> {
        let body = json!({ "domain": domain });
        self.remote
            .call("enrich_company", || {
                self.post_json("/companies/enrich", &body)
            })
            .await
    }

    async fn discover_contacts(
        &self,
        domain: &str,
        titles: &[String],
    ) -> CoreResult<Vec<serde_json::Value>> {
        let body = json!({ "domain": domain, "titles": titles });
        let payload = self
            .remote
            .call("discover_contacts", || {
                self.post_json("/contacts/discover", &body)
            })
            .await?;
        Ok(payload
            .get("contacts")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
