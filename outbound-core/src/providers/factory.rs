//! Provider selection and wiring.

use crate::config::{OutboundConfig, ProviderRole};
use crate::providers::email::{ConsoleEmail, LemlistEmail, PostmarkEmail};
use crate::providers::linkedin::{LemlistLinkedIn, PhantomBusterLinkedIn};
use crate::providers::webhook::{WebhookHandler, WebhookRegistry};
use crate::providers::{
    crm::HubSpotCrm, email, enrichment::ExploriumEnrichment, linkedin, video::HeyGenVideo,
    CrmProvider, EmailProvider, EnrichmentProvider, FallbackEmail, IdempotentEmail,
    IdempotentLinkedIn, LinkedInProvider, VideoProvider,
};
use crate::reliability::{BreakerState, Remote};
use crate::secrets::{keys, SecretStore};
use crate::store::IdempotencyStore;
use std::sync::Arc;
use tracing::warn;

/// The wired provider surface handed to workers and the responder.
pub struct ProviderSet {
    /// Active email channel (idempotent, with configured fallback).
    pub email: Arc<dyn EmailProvider>,

    /// Active LinkedIn channel, when a provider key is configured.
    pub linkedin: Option<Arc<dyn LinkedInProvider>>,

    /// CRM provider, when configured.
    pub crm: Option<Arc<dyn CrmProvider>>,

    /// Enrichment provider, when configured.
    pub enrichment: Option<Arc<dyn EnrichmentProvider>>,

    /// Video provider, when configured.
    pub video: Option<Arc<dyn VideoProvider>>,

    /// Webhook verification/normalisation registry.
    pub webhooks: WebhookRegistry,

    remotes: Vec<Remote>,
}

impl ProviderSet {
    /// Build the full provider surface from configuration and secrets.
    #[must_use]
    pub fn build(
        config: &OutboundConfig,
        secrets: &SecretStore,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        let settings = &config.provider;
        let mut remotes = Vec::new();
        let mut track = |remote: Remote| -> Remote {
            remotes.push(remote.clone());
            remote
        };

        // Email adapters; missing keys degrade to the console backend so a
        // fresh checkout still runs end-to-end.
        let lemlist: Arc<dyn EmailProvider> =
            secrets.get_opt(keys::EMAIL_PRIMARY_KEY).map_or_else(
                || {
                    warn!("no lemlist key configured, email primary degrades to console");
                    Arc::new(ConsoleEmail::new()) as Arc<dyn EmailProvider>
                },
                |key| {
                    Arc::new(LemlistEmail::new(
                        &key,
                        &settings.email_from,
                        track(Remote::new("lemlist", settings)),
                    ))
                },
            );
        let postmark: Arc<dyn EmailProvider> =
            secrets.get_opt(keys::EMAIL_SECONDARY_KEY).map_or_else(
                || {
                    warn!("no postmark token configured, email secondary degrades to console");
                    Arc::new(ConsoleEmail::new()) as Arc<dyn EmailProvider>
                },
                |key| {
                    Arc::new(PostmarkEmail::new(
                        &key,
                        &settings.email_from,
                        track(Remote::new("postmark", settings)),
                    ))
                },
            );

        let (active, standby) = match settings.email.provider {
            ProviderRole::Primary => (lemlist, postmark),
            ProviderRole::Secondary => (postmark, lemlist),
        };
        let email: Arc<dyn EmailProvider> = Arc::new(IdempotentEmail::new(
            Arc::new(FallbackEmail::new(
                active,
                standby,
                settings.fallback_on_failure,
            )),
            idempotency.clone(),
        ));

        // LinkedIn adapters; absent keys leave the channel unconfigured.
        let phantombuster = secrets.get_opt(keys::LINKEDIN_KEY).map(|key| {
            let agent_id = secrets
                .get_opt("LINKEDIN_AGENT_ID")
                .unwrap_or_else(|| "default".to_string());
            Arc::new(PhantomBusterLinkedIn::new(
                &key,
                &agent_id,
                track(Remote::new("phantombuster", settings)),
            )) as Arc<dyn LinkedInProvider>
        });
        let lemlist_linkedin = secrets.get_opt(keys::EMAIL_PRIMARY_KEY).map(|key| {
            Arc::new(LemlistLinkedIn::new(
                &key,
                track(Remote::new("lemlist-linkedin", settings)),
            )) as Arc<dyn LinkedInProvider>
        });
        let linkedin = match settings.linkedin.provider {
            ProviderRole::Primary => phantombuster.or(lemlist_linkedin),
            ProviderRole::Secondary => lemlist_linkedin.or(phantombuster),
        }
        .map(|inner| {
            Arc::new(IdempotentLinkedIn::new(inner, idempotency))
                as Arc<dyn LinkedInProvider>
        });

        let crm = secrets.get_opt(keys::CRM_TOKEN).map(|token| {
            Arc::new(HubSpotCrm::new(
                &token,
                track(Remote::new("hubspot", settings)),
            )) as Arc<dyn CrmProvider>
        });
        let enrichment = secrets.get_opt(keys::ENRICHMENT_KEY).map(|key| {
            Arc::new(ExploriumEnrichment::new(
                &key,
                track(Remote::new("explorium", settings)),
            )) as Arc<dyn EnrichmentProvider>
        });
        let video = secrets.get_opt(keys::VIDEO_KEY).map(|key| {
            Arc::new(HeyGenVideo::new(
                &key,
                track(Remote::new("heygen", settings)),
            )) as Arc<dyn VideoProvider>
        });

        let webhooks = Self::webhook_registry(secrets);

        Self {
            email,
            linkedin,
            crm,
            enrichment,
            video,
            webhooks,
            remotes,
        }
    }

    fn webhook_registry(secrets: &SecretStore) -> WebhookRegistry {
        let mut registry = WebhookRegistry::new();
        registry.register(
            secrets
                .get_opt(&keys::webhook_secret("lemlist"))
                .map_or_else(
                    || WebhookHandler::transport_auth("lemlist", email::lemlist_parse),
                    |secret| {
                        WebhookHandler::signed(
                            "lemlist",
                            &secret,
                            email::LEMLIST_SIGNATURE_HEADER,
                            email::lemlist_parse,
                        )
                    },
                ),
        );
        registry.register(WebhookHandler::transport_auth(
            "postmark",
            email::postmark_parse,
        ));
        registry.register(WebhookHandler::transport_auth(
            "phantombuster",
            linkedin::parse_phantombuster_webhook,
        ));
        registry
    }

    /// Breaker state per configured provider, for health reporting.
    #[must_use]
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        self.remotes
            .iter()
            .map(|remote| (remote.provider().to_string(), remote.breaker_state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStores;

    #[test]
    fn missing_keys_degrade_to_console_and_unconfigured_channels() {
        let config = OutboundConfig::default();
        let secrets = SecretStore::File {
            entries: std::collections::HashMap::new(),
        };
        let stores = MemoryStores::stores();
        let set = ProviderSet::build(&config, &secrets, stores.idempotency);

        assert_eq!(set.email.name(), "console");
        assert!(set.linkedin.is_none());
        assert!(set.crm.is_none());
        assert!(set.breaker_states().is_empty());
        let mut providers = set.webhooks.providers();
        providers.sort();
        assert_eq!(providers, vec!["lemlist", "phantombuster", "postmark"]);
    }

    #[test]
    fn configured_keys_select_real_adapters() {
        let config = OutboundConfig::default();
        let mut entries = std::collections::HashMap::new();
        entries.insert(keys::EMAIL_PRIMARY_KEY.to_string(), "lk".to_string());
        entries.insert(keys::EMAIL_SECONDARY_KEY.to_string(), "pk".to_string());
        entries.insert(keys::LINKEDIN_KEY.to_string(), "phk".to_string());
        entries.insert(keys::CRM_TOKEN.to_string(), "ct".to_string());
        let secrets = SecretStore::File { entries };
        let stores = MemoryStores::stores();
        let set = ProviderSet::build(&config, &secrets, stores.idempotency);

        assert_eq!(set.email.name(), "lemlist");
        assert_eq!(
            set.linkedin.as_ref().map(|l| l.name()),
            Some("phantombuster")
        );
        assert_eq!(set.crm.as_ref().map(|c| c.name()), Some("hubspot"));
        let states = set.breaker_states();
        assert!(states
            .iter()
            .all(|(_, state)| *state == BreakerState::Closed));
    }

    #[test]
    fn secondary_selection_flips_the_active_email_adapter() {
        let mut config = OutboundConfig::default();
        config.provider.email.provider = crate::config::ProviderRole::Secondary;
        let mut entries = std::collections::HashMap::new();
        entries.insert(keys::EMAIL_PRIMARY_KEY.to_string(), "lk".to_string());
        entries.insert(keys::EMAIL_SECONDARY_KEY.to_string(), "pk".to_string());
        let secrets = SecretStore::File { entries };
        let stores = MemoryStores::stores();
        let set = ProviderSet::build(&config, &secrets, stores.idempotency);
        assert_eq!(set.email.name(), "postmark");
    }
}
