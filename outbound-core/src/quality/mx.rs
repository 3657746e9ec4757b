//! MX record resolution with a short-lived cache.
//!
//! No DNS client crate is carried; lookups go over DNS-over-HTTPS through
//! the same reqwest stack every other remote call uses. The resolver is a
//! trait so tests and offline development can substitute a static answer.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Answers "does this domain accept mail".
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Whether the domain has at least one MX record.
    async fn has_mx(&self, domain: &str) -> CoreResult<bool>;
}

/// DNS-over-HTTPS resolver with a five-minute cache.
pub struct DohMxResolver {
    http: reqwest::Client,
    endpoint: String,
    cache: Mutex<HashMap<String, (Instant, bool)>>,
    ttl: Duration,
}

impl DohMxResolver {
    const DEFAULT_ENDPOINT: &'static str = "https://cloudflare-dns.com/dns-query";
    const CACHE_TTL: Duration = Duration::from_secs(300);

    /// Build the resolver against the default endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            cache: Mutex::new(HashMap::new()),
            ttl: Self::CACHE_TTL,
        }
    }

    /// Override the DoH endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn cached(&self, domain: &str) -> Option<bool> {
        let cache = self.cache.lock();
        cache
            .get(domain)
            .filter(|(at, _)| at.elapsed() <= self.ttl)
            .map(|(_, found)| *found)
    }
}

impl Default for DohMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for DohMxResolver {
    async fn has_mx(&self, domain: &str) -> CoreResult<bool> {
        let domain = domain.trim().to_lowercase();
        if let Some(found) = self.cached(&domain) {
            return Ok(found);
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("name", domain.as_str()), ("type", "MX")])
            .header("accept", "application/dns-json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::from_status(status.as_u16(), "dns query failed"));
        }
        let payload: serde_json::Value = response.json().await?;
        let found = payload
            .get("Answer")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|answers| !answers.is_empty());

        debug!(domain = %domain, found, "mx lookup");
        self.cache
            .lock()
            .insert(domain, (Instant::now(), found));
        Ok(found)
    }
}

/// Fixed-answer resolver for tests and offline development.
#[derive(Debug, Clone)]
pub struct StaticMxResolver {
    accept: bool,
}

impl StaticMxResolver {
    /// Resolver that reports MX records for every domain.
    #[must_use]
    pub const fn accepting() -> Self {
        Self { accept: true }
    }

    /// Resolver that reports no MX records at all.
    #[must_use]
    pub const fn rejecting() -> Self {
        Self { accept: false }
    }
}

#[async_trait]
impl MxResolver for StaticMxResolver {
    async fn has_mx(&self, _domain: &str) -> CoreResult<bool> {
        Ok(self.accept)
    }
}
