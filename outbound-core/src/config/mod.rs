//! Configuration for the Outbound core.
//!
//! Loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `OUTBOUND_` prefix, `__` as
//!    the section separator, e.g. `OUTBOUND_ORPHANED__MAX_SIZE=5000`)
//! 2. `./outbound.toml`
//! 3. Hardcoded defaults (fallback)
//!
//! Every recognised key is env-overridable. Secrets are never configured
//! here; they resolve through [`crate::secrets::SecretStore`].

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Durable job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum number of queued jobs before `enqueue` is rejected.
    pub max_size: usize,

    /// Items processed between cancellation checks inside workers.
    pub batch_size: usize,

    /// Age after which a `processing` lease is considered stale and the job
    /// becomes re-claimable.
    pub stale_lease_secs: u64,

    /// Number of concurrent worker loops per process.
    pub workers: usize,

    /// Queue poll interval for idle workers.
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            batch_size: 50,
            stale_lease_secs: 300,
            workers: 4,
            poll_interval_ms: 500,
        }
    }
}

/// Orphaned-event queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrphanedSettings {
    /// Bounded queue capacity; overflow evicts the oldest entry.
    pub max_size: usize,

    /// Events processed per retry cycle.
    pub batch_size: usize,

    /// Attempts before an event is promoted to the dead-letter queue.
    pub max_attempts: u32,

    /// Backoff schedule, one entry per attempt, in seconds.
    pub retry_delays_secs: Vec<u64>,

    /// Interval between retry cycles.
    pub cycle_interval_ms: u64,
}

impl Default for OrphanedSettings {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            batch_size: 50,
            max_attempts: 6,
            retry_delays_secs: vec![5, 15, 60, 300, 900, 3600],
            cycle_interval_ms: 5_000,
        }
    }
}

/// Which adapter a channel routes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    /// The primary adapter for the channel.
    Primary,
    /// The secondary adapter for the channel.
    Secondary,
}

/// Circuit breaker settings, applied per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Error percentage over the rolling window that opens the breaker.
    pub error_threshold_pct: u8,

    /// Delay before an open breaker admits a half-open probe.
    pub reset_ms: u64,

    /// Rolling window length.
    pub window_ms: u64,

    /// Minimum request volume in the window before the breaker may open.
    pub min_volume: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            error_threshold_pct: 50,
            reset_ms: 30_000,
            window_ms: 10_000,
            min_volume: 10,
        }
    }
}

/// Per-channel adapter selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Active adapter for the channel.
    pub provider: ProviderRole,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            provider: ProviderRole::Primary,
        }
    }
}

/// Provider abstraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Email channel selection.
    pub email: ChannelSettings,

    /// LinkedIn channel selection.
    pub linkedin: ChannelSettings,

    /// On primary email send failure after retries, try the secondary once.
    pub fallback_on_failure: bool,

    /// Default sender address for email adapters.
    pub email_from: String,

    /// Per-request timeout.
    pub timeout_ms: u64,

    /// Circuit breaker settings.
    pub breaker: BreakerSettings,

    /// Token-bucket ceiling per provider, per minute.
    pub rate_limit_per_minute: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            email: ChannelSettings::default(),
            linkedin: ChannelSettings::default(),
            fallback_on_failure: true,
            email_from: "sales@outbound.example".to_string(),
            timeout_ms: 30_000,
            breaker: BreakerSettings::default(),
            rate_limit_per_minute: 60,
        }
    }
}

/// Conversational responder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderSettings {
    /// Maximum AI responses per lead per hour.
    pub rate_limit_per_hour: u32,

    /// Maximum AI responses per conversation thread (durable cap).
    pub max_per_thread: u32,

    /// Human-like delay before sending a generated reply.
    pub human_delay_ms: u64,

    /// Per-generation timeout.
    pub ai_timeout_ms: u64,

    /// Intents for which no AI reply is generated; the inbound message is
    /// still recorded.
    pub excluded_intents: Vec<String>,

    /// Hold generated replies for human review instead of sending.
    pub review_gate: bool,

    /// Interval of the rolling-window pruning task.
    pub cleanup_interval_ms: u64,

    /// Generate a personalised video for high-value intents.
    pub video_enabled: bool,

    /// Minimum lead score for an `interested` intent to count as high-value.
    pub video_min_lead_score: f64,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: 5,
            max_per_thread: 5,
            human_delay_ms: 30_000,
            ai_timeout_ms: 30_000,
            excluded_intents: vec![
                "not_interested".to_string(),
                "out_of_office".to_string(),
            ],
            review_gate: false,
            cleanup_interval_ms: 600_000,
            video_enabled: false,
            video_min_lead_score: 0.7,
        }
    }
}

/// Graceful shutdown budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Budget for draining the orphaned-event queue.
    pub drain_ms: u64,

    /// Budget for the worker pool to become idle.
    pub worker_stop_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_ms: 30_000,
            worker_stop_ms: 30_000,
        }
    }
}

/// Secret resolution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    /// Resolve from process environment variables.
    Env,
    /// Resolve from a TOML file of `key = "value"` entries.
    File,
    /// Recognised but unsupported; resolution returns an explicit error.
    Vault,
}

/// Secret store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsSettings {
    /// Which backend resolves secrets.
    pub store: SecretBackend,

    /// Path of the secrets file (file backend only).
    pub file_path: String,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            store: SecretBackend::Env,
            file_path: "./secrets.toml".to_string(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection string. When absent the core falls back to the
    /// in-memory stores, which are not production safe.
    pub url: Option<String>,

    /// Connection pool size.
    pub max_connections: Option<u32>,
}

/// HTTP edge settings (consumed by the server binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete Outbound configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutboundConfig {
    /// Job queue settings.
    pub queue: QueueSettings,

    /// Orphaned-event queue settings.
    pub orphaned: OrphanedSettings,

    /// Provider abstraction settings.
    pub provider: ProviderSettings,

    /// Conversational responder settings.
    pub responder: ResponderSettings,

    /// Graceful shutdown budgets.
    pub shutdown: ShutdownSettings,

    /// Secret resolution settings.
    pub secrets: SecretsSettings,

    /// Database settings.
    pub database: DatabaseSettings,

    /// HTTP edge settings.
    pub server: ServerSettings,
}

impl OutboundConfig {
    /// Load configuration from `./outbound.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a source contains keys of the wrong shape.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("outbound.toml")
    }

    /// Load configuration from a specific TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a source contains keys of the wrong shape.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("OUTBOUND_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Per-request provider timeout as a [`Duration`].
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider.timeout_ms)
    }

    /// Orphaned-event backoff schedule as [`Duration`]s.
    #[must_use]
    pub fn orphaned_retry_delays(&self) -> Vec<Duration> {
        self.orphaned
            .retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}
