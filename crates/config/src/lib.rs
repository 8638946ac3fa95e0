//! Configuration loading, validation, and management for seqpilot.
//!
//! Loads configuration from `~/.seqpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup; after that the
//! configuration is read-only for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.seqpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Primary LLM provider; its `fallback_chain` drives failover
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when a provider entry doesn't name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Backoff policy shared by every provider
    #[serde(default)]
    pub retry: RetryConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Task-completion detector policy
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Remote tool servers
    #[serde(default)]
    pub tool_servers: ToolServersConfig,

    /// Plugin discovery
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Tool-call audit log
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Provider-specific configurations, keyed by provider id
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "deepseek/deepseek-chat".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("completion", &self.completion)
            .field("tool_servers", &self.tool_servers)
            .field("plugins", &self.plugins)
            .field("memory", &self.memory)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("enabled", &self.enabled)
            .field("retryable_statuses", &self.retryable_statuses)
            .field("fallback_chain", &self.fallback_chain)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// One configured LLM endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Disabled providers are skipped when building a chain
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Status codes worth retrying; everything else short-circuits
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    /// Provider ids to try, in order, once this one is exhausted
    #[serde(default)]
    pub fallback_chain: Vec<String>,

    /// Per-request HTTP timeout
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// 429, the 5xx gateway family, and Cloudflare's origin/timeout codes.
fn default_retryable_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504, 520, 522, 524]
}
fn default_provider_timeout() -> u64 {
    120
}

impl ProviderConfig {
    /// Whether a failed request with this status may be retried.
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: None,
            enabled: true,
            retryable_statuses: default_retryable_statuses(),
            fallback_chain: vec![],
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider before failing over (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, as a fraction (0.3 = ±30%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on model/tool rounds per user request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Label stamped on every tool result and audit record
    #[serde(default = "default_agent_label")]
    pub agent_label: String,

    /// Execution budget for a single tool dispatch
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Replace the built-in instructions entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    /// Sent when a round has no tool calls and no clear completion
    #[serde(default = "default_continue_prompt")]
    pub continue_prompt: String,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_agent_label() -> String {
    "seqpilot".into()
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_continue_prompt() -> String {
    "Continue with the task. If it is finished, say so explicitly.".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            agent_label: default_agent_label(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt_override: None,
            continue_prompt: default_continue_prompt(),
        }
    }
}

/// A weighted lexical signal. Negative weights mark "still working" phrases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub phrase: String,
    pub weight: f32,
}

impl CompletionMarker {
    pub fn new(phrase: &str, weight: f32) -> Self {
        Self {
            phrase: phrase.into(),
            weight,
        }
    }
}

/// Tunable policy for the task-completion detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Confidence must exceed this to declare completion
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_markers")]
    pub markers: Vec<CompletionMarker>,

    #[serde(default = "default_terminal_weight")]
    pub terminal_punctuation_weight: f32,

    /// Response ends without a dangling tool-call fragment or open code fence
    #[serde(default = "default_clean_weight")]
    pub clean_ending_weight: f32,

    /// Response ends by asking the user something
    #[serde(default = "default_question_weight")]
    pub question_weight: f32,

    /// Fraction of confidence removed when the round has tool calls (≥ 0.9)
    #[serde(default = "default_tool_call_penalty")]
    pub tool_call_penalty: f32,
}

fn default_threshold() -> f32 {
    0.45
}
fn default_terminal_weight() -> f32 {
    0.3
}
fn default_clean_weight() -> f32 {
    0.2
}
fn default_question_weight() -> f32 {
    0.6
}
fn default_tool_call_penalty() -> f32 {
    0.9
}
fn default_markers() -> Vec<CompletionMarker> {
    vec![
        CompletionMarker::new("task completed", 0.6),
        CompletionMarker::new("task complete", 0.6),
        CompletionMarker::new("completed successfully", 0.5),
        CompletionMarker::new("all done", 0.5),
        CompletionMarker::new("in summary", 0.3),
        CompletionMarker::new("done", 0.3),
        CompletionMarker::new("finished", 0.3),
        CompletionMarker::new("let me", -0.4),
        CompletionMarker::new("i will", -0.3),
        CompletionMarker::new("i'll", -0.3),
        CompletionMarker::new("next step", -0.3),
    ]
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            markers: default_markers(),
            terminal_punctuation_weight: default_terminal_weight(),
            clean_ending_weight: default_clean_weight(),
            question_weight: default_question_weight(),
            tool_call_penalty: default_tool_call_penalty(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolServersConfig {
    /// Connect to every listed server at startup. Off by default.
    #[serde(default)]
    pub auto_connect: bool,

    #[serde(default)]
    pub servers: Vec<ToolServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerEntry {
    pub name: String,

    /// `host:port`
    pub address: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_call_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra directories scanned for `plugin.toml` manifests
    #[serde(default)]
    pub dirs: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirs: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file", "memory" or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSONL path for the file backend (default: ~/.seqpilot/audit/tool_calls.jsonl)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Records kept before the oldest are evicted
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_memory_backend() -> String {
    "file".into()
}
fn default_retention() -> usize {
    5000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            retention: default_retention(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.seqpilot/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `SEQPILOT_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("SEQPILOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("SEQPILOT_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("SEQPILOT_MODEL") {
            config.default_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".seqpilot")
    }

    /// Default directory scanned for plugin manifests.
    pub fn plugins_dir() -> PathBuf {
        Self::config_dir().join("plugins")
    }

    /// Resolved path of the JSONL audit log.
    pub fn audit_log_path(&self) -> PathBuf {
        match &self.memory.path {
            Some(p) => PathBuf::from(p),
            None => Self::config_dir().join("audit").join("tool_calls.jsonl"),
        }
    }

    /// Look up a provider entry by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// API key for a provider: its own, else the global one.
    pub fn api_key_for(&self, id: &str) -> Option<String> {
        self.providers
            .get(id)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Model for a provider: its own, else the default model.
    pub fn model_for(&self, id: &str) -> String {
        self.providers
            .get(id)
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be in [0.0, 1.0)".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        // Confidence is capped at 1.0 and must exceed the threshold
        if !(self.completion.threshold > 0.0 && self.completion.threshold < 1.0) {
            return Err(ConfigError::ValidationError(
                "completion.threshold must be in (0.0, 1.0)".into(),
            ));
        }

        if !(0.9..=1.0).contains(&self.completion.tool_call_penalty) {
            return Err(ConfigError::ValidationError(
                "completion.tool_call_penalty must be between 0.9 and 1.0".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        if self.memory.retention == 0 {
            return Err(ConfigError::ValidationError(
                "memory.retention must be at least 1".into(),
            ));
        }

        for (id, provider) in &self.providers {
            for next in &provider.fallback_chain {
                if !self.providers.contains_key(next) {
                    return Err(ConfigError::ValidationError(format!(
                        "provider '{id}' falls back to unknown provider '{next}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            retry: RetryConfig::default(),
            agent: AgentSettings::default(),
            completion: CompletionConfig::default(),
            tool_servers: ToolServersConfig::default(),
            plugins: PluginsConfig::default(),
            memory: MemoryConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
