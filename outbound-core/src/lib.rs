//! outbound-core: the engine of the Outbound sales-outreach backend.
//!
//! The core is organised as a one-way dependency chain: reliability
//! primitives feed the provider adapters, adapters feed the pipeline
//! workers, workers hang off the durable job queue, and the HTTP edge (the
//! `outbound-server` crate) only ever talks to [`runtime::CoreRuntime`].
//!
//! The subsystems that make delivery reliable:
//!
//! - [`jobs`]: durable queue with priorities, atomic claims, cooperative
//!   cancellation and crash recovery
//! - [`orphaned`]: bounded retry queue for webhook events that arrive
//!   before their enrolment, with a dead-letter sink
//! - [`providers`]: Lemlist / Postmark / PhantomBuster / HubSpot /
//!   Explorium / HeyGen behind capability traits, wrapped in retries,
//!   circuit breakers, rate limits and idempotency
//! - [`quality`]: the allow / warn / block gate every send passes through
//! - [`responder`]: rate-limited, validated AI replies to inbound messages
//!
//! # Quick start
//!
//! ```rust,no_run
//! use outbound_core::config::OutboundConfig;
//! use outbound_core::runtime::CoreRuntime;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OutboundConfig::load()?;
//! let runtime = CoreRuntime::build(config).await?;
//! runtime.start();
//! // ... serve traffic, then:
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod jobs;
pub mod model;
pub mod observability;
pub mod orphaned;
pub mod providers;
pub mod quality;
pub mod reliability;
pub mod responder;
pub mod runtime;
pub mod secrets;
pub mod store;
pub mod workers;

pub mod testing;
