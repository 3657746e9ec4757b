//! Secret resolution.
//!
//! Provider keys, the CRM token and webhook HMAC secrets are never placed in
//! configuration; they resolve through the [`SecretStore`] capability.
//! Backends: process environment (default) and a TOML file of
//! `key = "value"` entries. `vault` is a recognised setting but resolves to
//! an explicit error.

use crate::config::{SecretBackend, SecretsSettings};
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;

/// Well-known secret names.
pub mod keys {
    /// CRM (HubSpot) private-app token.
    pub const CRM_TOKEN: &str = "CRM_TOKEN";
    /// Primary email provider (Lemlist) API key.
    pub const EMAIL_PRIMARY_KEY: &str = "EMAIL_PRIMARY_KEY";
    /// Secondary email provider (Postmark) server token.
    pub const EMAIL_SECONDARY_KEY: &str = "EMAIL_SECONDARY_KEY";
    /// LinkedIn automation (PhantomBuster) API key.
    pub const LINKEDIN_KEY: &str = "LINKEDIN_KEY";
    /// Enrichment provider (Explorium) API key.
    pub const ENRICHMENT_KEY: &str = "ENRICHMENT_KEY";
    /// Video provider (HeyGen) API key.
    pub const VIDEO_KEY: &str = "VIDEO_KEY";
    /// Reply generator endpoint API key.
    pub const GENERATOR_KEY: &str = "GENERATOR_KEY";

    /// Webhook HMAC secret for a provider, by convention
    /// `WEBHOOK_SECRET_<PROVIDER>`.
    #[must_use]
    pub fn webhook_secret(provider: &str) -> String {
        format!("WEBHOOK_SECRET_{}", provider.to_uppercase())
    }
}

/// Resolves named secrets from the configured backend.
#[derive(Debug, Clone)]
pub enum SecretStore {
    /// Environment-variable backend with an `OUTBOUND_SECRET_` prefix.
    Env,
    /// File backend, loaded once at construction.
    File {
        /// Parsed `key = "value"` entries.
        entries: HashMap<String, String>,
    },
}

impl SecretStore {
    /// Environment variable prefix for the env backend.
    const ENV_PREFIX: &'static str = "OUTBOUND_SECRET_";

    /// Build a store from settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the file backend is selected and the file is
    /// missing or malformed, or when the `vault` backend is selected.
    pub fn from_settings(settings: &SecretsSettings) -> CoreResult<Self> {
        match settings.store {
            SecretBackend::Env => Ok(Self::Env),
            SecretBackend::File => {
                let raw = std::fs::read_to_string(&settings.file_path).map_err(|e| {
                    CoreError::Secret(format!(
                        "cannot read secrets file {}: {e}",
                        settings.file_path
                    ))
                })?;
                let entries: HashMap<String, String> = toml::from_str(&raw)
                    .map_err(|e| CoreError::Secret(format!("malformed secrets file: {e}")))?;
                Ok(Self::File { entries })
            }
            SecretBackend::Vault => Err(CoreError::Secret(
                "vault secret backend is not supported".to_string(),
            )),
        }
    }

    /// Resolve a secret by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Secret`] when the secret is absent.
    pub fn get(&self, name: &str) -> CoreResult<String> {
        match self {
            Self::Env => std::env::var(format!("{}{name}", Self::ENV_PREFIX))
                .map_err(|_| CoreError::Secret(format!("secret {name} is not set"))),
            Self::File { entries } => entries
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::Secret(format!("secret {name} is not set"))),
        }
    }

    /// Resolve a secret, returning `None` when absent.
    #[must_use]
    pub fn get_opt(&self, name: &str) -> Option<String> {
        self.get(name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretsSettings;
    use std::io::Write;

    #[test]
    fn env_backend_reads_prefixed_variables() {
        std::env::set_var("OUTBOUND_SECRET_TEST_TOKEN", "s3cret");
        let store = SecretStore::Env;
        assert_eq!(store.get("TEST_TOKEN").expect("secret"), "s3cret");
        std::env::remove_var("OUTBOUND_SECRET_TEST_TOKEN");
    }

    #[test]
    fn env_backend_reports_missing_secret() {
        let store = SecretStore::Env;
        let err = store.get("DEFINITELY_NOT_SET_ANYWHERE").unwrap_err();
        assert!(matches!(err, CoreError::Secret(_)));
    }

    #[test]
    fn file_backend_parses_toml_entries() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "CRM_TOKEN = \"tok-123\"").expect("write");
        let settings = SecretsSettings {
            store: SecretBackend::File,
            file_path: file.path().to_string_lossy().into_owned(),
        };
        let store = SecretStore::from_settings(&settings).expect("store");
        assert_eq!(store.get(keys::CRM_TOKEN).expect("secret"), "tok-123");
        assert!(store.get_opt("NOPE").is_none());
    }

    #[test]
    fn vault_backend_is_rejected() {
        let settings = SecretsSettings {
            store: SecretBackend::Vault,
            file_path: String::new(),
        };
        assert!(SecretStore::from_settings(&settings).is_err());
    }

    #[test]
    fn webhook_secret_name_is_uppercased() {
        assert_eq!(keys::webhook_secret("postmark"), "WEBHOOK_SECRET_POSTMARK");
    }
}
