//! Configuration loading, validation, and management for Earshot.
//!
//! Loads configuration from `~/.earshot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.earshot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Readiness loop timing
    #[serde(default)]
    pub poller: PollerConfig,

    /// Context assembly and fallback for dispatched queries
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Phrases that start a query
    #[serde(default)]
    pub wake_words: WakeWordConfig,

    /// The language-model agent that answers queries
    #[serde(default)]
    pub agent: AgentConfig,

    /// Where transcripts, queries and insights live
    #[serde(default)]
    pub store: StoreConfig,
}

/// How the readiness loop ticks and decides a query is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Sleep between ticks
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,

    /// Sleep when the store reports itself not ready
    #[serde(default = "default_tick_ms")]
    pub not_ready_backoff_ms: u64,

    /// Sleep after a failed tick
    #[serde(default = "default_tick_ms")]
    pub error_backoff_ms: u64,

    /// How far back each tick looks for new transcript text to scan
    #[serde(default = "default_discovery_window")]
    pub discovery_window_secs: f64,

    /// A pending query is dispatched this long after its wake word, speech or not
    #[serde(default = "default_force_query")]
    pub force_query_secs: f64,

    /// A pending query is dispatched once the user has been silent this long
    #[serde(default = "default_pause_query")]
    pub pause_query_secs: f64,

    /// Whether dispatches run inline or on a bounded task pool
    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    /// Upper bound on in-flight dispatches in concurrent mode
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,
}

fn default_tick_ms() -> u64 {
    100
}
fn default_discovery_window() -> f64 {
    2.0
}
fn default_force_query() -> f64 {
    8.0
}
fn default_pause_query() -> f64 {
    1.5
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_ms(),
            not_ready_backoff_ms: default_tick_ms(),
            error_backoff_ms: default_tick_ms(),
            discovery_window_secs: default_discovery_window(),
            force_query_secs: default_force_query(),
            pause_query_secs: default_pause_query(),
            dispatch_mode: DispatchMode::default(),
            max_concurrent_dispatches: default_max_concurrent(),
        }
    }
}

impl PollerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn not_ready_backoff(&self) -> Duration {
        Duration::from_millis(self.not_ready_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn discovery_window(&self) -> Duration {
        timer(self.discovery_window_secs)
    }

    pub fn force_query_time(&self) -> Duration {
        timer(self.force_query_secs)
    }

    pub fn pause_query_time(&self) -> Duration {
        timer(self.pause_query_secs)
    }
}

/// Longest accepted readiness timer, in seconds.
pub const MAX_TIMER_SECS: f64 = 3600.0;

/// Seconds to `Duration`, clamped to `[0, MAX_TIMER_SECS]` so an
/// unvalidated config can never panic the poller.
fn timer(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_TIMER_SECS)).unwrap_or(Duration::ZERO)
}

/// Whether the poller awaits each dispatch or hands it to a task pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Await each dispatch before looking at the next user (default)
    #[default]
    Inline,
    /// Spawn each dispatch; at most one in flight per user
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Transcript lookback used as situational context for the agent
    #[serde(default = "default_context_window")]
    pub context_window_secs: u64,

    /// Persisted in place of an answer when generation fails
    #[serde(default = "default_fallback_insight")]
    pub fallback_insight: String,
}

fn default_context_window() -> u64 {
    8 * 60
}
fn default_fallback_insight() -> String {
    "Hmm, not sure about that one, bud.".into()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            context_window_secs: default_context_window(),
            fallback_insight: default_fallback_insight(),
        }
    }
}

impl DispatchConfig {
    pub fn context_window(&self) -> Duration {
        Duration::from_secs(self.context_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordConfig {
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
}

fn default_phrases() -> Vec<String> {
    vec!["hey augment".into(), "hey assistant".into()]
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            phrases: default_phrases(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider label, used in logs
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key (can be overridden by environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    512
}
fn default_system_prompt() -> String {
    "You are a voice assistant running on smart glasses. The user asked you a question out loud. \
     Answer it directly in one or two short sentences that can be read at a glance. \
     Use the conversation transcript and earlier exchanges only as context."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite file; defaults to `~/.earshot/earshot.sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The SQLite database path, resolved against the config directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => AppConfig::config_dir().join("earshot.sqlite"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.earshot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `EARSHOT_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `EARSHOT_MODEL`
    /// - `EARSHOT_DATABASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
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

    fn apply_env(&mut self) {
        if self.agent.api_key.is_none() {
            self.agent.api_key = std::env::var("EARSHOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("EARSHOT_MODEL") {
            self.agent.model = model;
        }

        if let Ok(path) = std::env::var("EARSHOT_DATABASE") {
            self.store.path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".earshot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.poller;
        if p.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poller.tick_interval_ms must be > 0".into(),
            ));
        }
        for (name, value) in [
            ("poller.discovery_window_secs", p.discovery_window_secs),
            ("poller.force_query_secs", p.force_query_secs),
            ("poller.pause_query_secs", p.pause_query_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
            if value > MAX_TIMER_SECS {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be <= {MAX_TIMER_SECS}"
                )));
            }
        }
        if p.max_concurrent_dispatches == 0 {
            return Err(ConfigError::ValidationError(
                "poller.max_concurrent_dispatches must be >= 1".into(),
            ));
        }

        if self.wake_words.phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "wake_words.phrases must contain at least one phrase".into(),
            ));
        }

        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.store.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.agent.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None => PathBuf::from(path),
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
