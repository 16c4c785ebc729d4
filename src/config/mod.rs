//! Configuration management for chat-stream
//!
//! Supports configuration via:
//! 1. Config file (~/.config/chat-stream/config.toml)
//! 2. Environment variables (DEEPSEEK_API_KEY, DASHSCOPE_API_KEY, etc.)
//! 3. CLI arguments (profile selection, `--mock`)

use crate::api::{ModelConfig, ProviderKind, TransportConfig, DEFAULT_MAX_ERROR_BODY_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Profile used when none is named on the command line
    pub default_profile: String,

    /// Named model profiles
    pub profiles: BTreeMap<String, ProfileSettings>,

    /// HTTP transport settings
    pub transport: TransportSettings,

    /// Interactive shell settings
    pub chat: ChatSettings,
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "deepseek".to_string(),
            ProfileSettings::new(ProviderKind::OpenAIStyle, "deepseek-chat"),
        );
        profiles.insert(
            "deepseek-reasoner".to_string(),
            ProfileSettings {
                thinking: true,
                ..ProfileSettings::new(ProviderKind::OpenAIStyle, "deepseek-reasoner")
            },
        );
        profiles.insert(
            "qwen".to_string(),
            ProfileSettings {
                thinking: true,
                ..ProfileSettings::new(ProviderKind::DashScope, "qwen-plus")
            },
        );
        profiles.insert(
            "qwen-vl".to_string(),
            ProfileSettings::new(ProviderKind::DashScope, "qwen-vl-plus"),
        );

        Self {
            default_profile: "deepseek".to_string(),
            profiles,
            transport: TransportSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

/// One model profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Wire protocol: "openai_style" or "dashscope"
    pub provider: ProviderKind,

    /// Model name sent to the provider
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens for responses
    #[serde(default = "default_token_limit")]
    pub token_limit: u32,

    /// API key (can also come from the provider's env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request separate reasoning output
    #[serde(default)]
    pub thinking: bool,

    /// Endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_token_limit() -> u32 {
    4096
}

impl ProfileSettings {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: default_temperature(),
            token_limit: default_token_limit(),
            api_key: None,
            thinking: false,
            base_url: None,
        }
    }

    pub fn to_model_config(&self) -> ModelConfig {
        ModelConfig {
            provider: self.provider,
            model_name: self.model.clone(),
            temperature: self.temperature,
            token_limit: self.token_limit,
            api_key: self.api_key.clone().unwrap_or_default(),
            thinking: self.thinking,
            base_url: self.base_url.clone(),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Whole-request timeout; unset means streams may run indefinitely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    pub connect_timeout_secs: u64,

    /// Cap on buffered error response bodies
    pub max_error_body_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            connect_timeout_secs: 15,
            max_error_body_bytes: DEFAULT_MAX_ERROR_BODY_BYTES,
        }
    }
}

impl TransportSettings {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_error_body_bytes: self.max_error_body_bytes,
        }
    }
}

/// Interactive shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Print reasoning text while it streams
    pub show_reasoning: bool,

    /// Delay between chunks of the mock provider
    pub mock_chunk_delay_ms: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            show_reasoning: true,
            mock_chunk_delay_ms: 60,
        }
    }
}

/// Env vars holding API keys, in lookup order, per provider
fn key_env_vars(provider: ProviderKind) -> &'static [&'static str] {
    match provider {
        ProviderKind::OpenAIStyle => &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"],
        ProviderKind::DashScope => &["DASHSCOPE_API_KEY"],
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chat-stream")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path; a missing file yields the built-in profiles
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Keys from the file win over the environment
        for profile in self.profiles.values_mut() {
            if profile.api_key.is_none() {
                profile.api_key = key_env_vars(profile.provider)
                    .iter()
                    .copied()
                    .find_map(&lookup);
            }
        }

        if let Some(profile) = lookup("CHAT_STREAM_PROFILE") {
            self.default_profile = profile;
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.profiles.contains_key(&self.default_profile) {
            return Err(ConfigError::UnknownProfile(self.default_profile.clone()));
        }

        for (name, profile) in &self.profiles {
            if profile.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("profile {}: empty model", name)));
            }
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(ConfigError::Invalid(format!(
                    "profile {}: temperature {} outside 0.0..=2.0",
                    name, profile.temperature
                )));
            }
            if profile.token_limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "profile {}: token_limit must be positive",
                    name
                )));
            }
            if let Some(base_url) = &profile.base_url {
                reqwest::Url::parse(base_url).map_err(|e| {
                    ConfigError::Invalid(format!("profile {}: base_url {}: {}", name, base_url, e))
                })?;
            }
        }

        if self.transport.max_error_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "transport.max_error_body_bytes must be positive".to_string(),
            ));
        }

        let default = self.profile(None)?;
        if default.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingRequired(format!(
                "API key for profile {} (set it in the config or via {})",
                self.default_profile,
                key_env_vars(default.provider).join(" / ")
            )));
        }

        Ok(())
    }

    /// Look up a profile; `None` selects the default profile
    pub fn profile(&self, name: Option<&str>) -> Result<&ProfileSettings, ConfigError> {
        let name = name.unwrap_or(&self.default_profile);
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Model configuration for a profile; `None` selects the default profile
    pub fn model_config(&self, name: Option<&str>) -> Result<ModelConfig, ConfigError> {
        Ok(self.profile(name)?.to_model_config())
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn default_profile(mut self, name: impl Into<String>) -> Self {
        self.config.default_profile = name.into();
        self
    }

    pub fn profile(mut self, name: impl Into<String>, profile: ProfileSettings) -> Self {
        self.config.profiles.insert(name.into(), profile);
        self
    }

    /// Set the API key of an existing profile
    pub fn api_key(mut self, profile: &str, key: impl Into<String>) -> Self {
        if let Some(settings) = self.config.profiles.get_mut(profile) {
            settings.api_key = Some(key.into());
        }
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transport.request_timeout_secs = Some(secs);
        self
    }

    pub fn max_error_body_bytes(mut self, bytes: usize) -> Self {
        self.config.transport.max_error_body_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
