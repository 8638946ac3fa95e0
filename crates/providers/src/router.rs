//! Provider router: builds providers from config and resolves fallback chains.
//!
//! Each configured endpoint becomes a [`ProviderProfile`]: the client, the
//! model it should be asked for, and its read-only `ProviderConfig` (retry
//! predicate and fallback chain). Profiles are built once at startup.

use crate::openai_compat::OpenAiCompatProvider;
use seqpilot_config::{AppConfig, ProviderConfig};
use seqpilot_core::error::ProviderError;
use seqpilot_core::provider::Provider;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One configured provider, ready to be called.
#[derive(Clone)]
pub struct ProviderProfile {
    pub id: String,
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub config: ProviderConfig,
}

impl std::fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("config", &self.config)
            .finish()
    }
}

/// Registry of provider profiles keyed by id.
pub struct ProviderRouter {
    profiles: BTreeMap<String, ProviderProfile>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            profiles: BTreeMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a profile, replacing any profile with the same id.
    pub fn register(&mut self, profile: ProviderProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn default_id(&self) -> &str {
        &self.default_provider
    }

    /// Get the default provider profile.
    pub fn default(&self) -> Option<&ProviderProfile> {
        self.profiles.get(&self.default_provider)
    }

    /// Get a specific profile by id.
    pub fn get(&self, id: &str) -> Option<&ProviderProfile> {
        self.profiles.get(id)
    }

    /// List all registered provider ids.
    pub fn list(&self) -> Vec<&str> {
        self.profiles.keys().map(|s| s.as_str()).collect()
    }

    /// The ordered chain for `primary`: itself, then its `fallback_chain`.
    ///
    /// Duplicates, unknown ids and disabled providers are skipped. Returns an
    /// empty chain when nothing usable remains.
    pub fn chain(&self, primary: &str) -> Vec<ProviderProfile> {
        let Some(head) = self.profiles.get(primary) else {
            return Vec::new();
        };

        let mut chain: Vec<ProviderProfile> = Vec::new();
        let ids = std::iter::once(primary).chain(head.config.fallback_chain.iter().map(|s| s.as_str()));

        for id in ids {
            if chain.iter().any(|p| p.id == id) {
                continue;
            }
            match self.profiles.get(id) {
                Some(profile) if profile.config.enabled => chain.push(profile.clone()),
                Some(_) => warn!(provider = %id, "Skipping disabled provider in chain"),
                None => warn!(provider = %id, "Skipping unknown provider in chain"),
            }
        }

        chain
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (id, provider_config) in &config.providers {
        router.register(build_profile(config, id, provider_config.clone())?);
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let id = config.default_provider.clone();
        router.register(build_profile(config, &id, ProviderConfig::default())?);
    }

    Ok(router)
}

fn build_profile(
    config: &AppConfig,
    id: &str,
    provider_config: ProviderConfig,
) -> Result<ProviderProfile, ProviderError> {
    let api_key = config.api_key_for(id).unwrap_or_default();
    let base_url = provider_config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(id));

    let provider = OpenAiCompatProvider::new(
        id,
        base_url,
        api_key,
        Duration::from_secs(provider_config.timeout_secs),
    )?;

    Ok(ProviderProfile {
        id: id.to_string(),
        provider: Arc::new(provider),
        model: config.model_for(id),
        config: provider_config,
    })
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "siliconflow" => "https://api.siliconflow.cn/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
