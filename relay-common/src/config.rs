//! Configuration management for the chat relay.
//!
//! The relay reads an optional JSON file at `~/.chat-relay/config.json`.
//! Every field has a default, so a missing file or a partial file is fine.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `RELAY_PORT` / `PORT` → network.port
//! - `RELAY_BIND_ADDRESS` → network.bind
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format
//! - `RELAY_UPSTREAM_URL` → upstream.base_url
//! - `GROQ_API_KEY` → secrets.api_key

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chat-relay"),
        |dirs| dirs.home_dir().join(".chat-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

// ============================================================================
// Upstream Configuration
// ============================================================================

/// Upstream completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API (without `/v1/...`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum number of generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Longest wait for the next fragment before the stream is considered dead
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Frames buffered between the upstream reader and the HTTP response
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.groq.com/openai".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> i64 {
    4096
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    32
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session used when a request omits `sessionId`
    #[serde(default = "default_session_id")]
    pub default_session_id: String,

    /// Number of trailing turns sent upstream as context
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// System instruction prepended to every context window
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_session_id: default_session_id(),
            context_turns: default_context_turns(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_session_id() -> String {
    "default".into()
}

fn default_context_turns() -> usize {
    10
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant. Provide clear, accurate, and helpful responses. \
     When showing code, use proper formatting."
        .into()
}

// ============================================================================
// Model Table
// ============================================================================

/// One entry of the static model table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// User-facing key (e.g. "llama-3-70b")
    pub id: String,
    /// Display name
    pub name: String,
    /// Provider model identifier
    pub model: String,
}

impl ModelConfig {
    pub fn new(id: &str, name: &str, model: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
        }
    }
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new("llama-3-70b", "Llama 3 70B", "llama3-70b-8192"),
        ModelConfig::new("mixtral-8x7b", "Mixtral 8x7B", "mixtral-8x7b-32768"),
    ]
}

// ============================================================================
// Observability / Secrets
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to clamp to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Credentials known at startup.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Initial upstream API key. Usually absent; set at runtime instead.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Static model table, in display order
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            upstream: UpstreamConfig::default(),
            session: SessionConfig::default(),
            models: default_models(),
            observability: ObservabilityConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // RELAY_PORT wins over the generic PORT
        if let Some(port) = lookup("RELAY_PORT").or_else(|| lookup("PORT")) {
            if let Ok(p) = port.parse() {
                self.network.port = p;
            }
        }

        if let Some(bind) = lookup("RELAY_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(url) = lookup("RELAY_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }

        if let Some(key) = lookup("GROQ_API_KEY") {
            if !key.trim().is_empty() {
                self.secrets.api_key = Some(key);
            }
        }
    }

    /// Socket address the server listens on. IPv6 binds such as `::` work
    /// without brackets.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .network
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.network.bind))?;
        Ok(SocketAddr::new(ip, self.network.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.session.context_turns, 10);
        assert_eq!(config.session.default_session_id, "default");
        assert_eq!(config.upstream.max_tokens, 4096);
        assert!((config.upstream.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.models.len(), 2);
        assert!(config.secrets.api_key.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{ "network": { "port": 8080 }, "session": { "context_turns": 4 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.session.context_turns, 4);
        assert_eq!(config.models[0].id, "llama-3-70b");
        assert_eq!(config.models[0].model, "llama3-70b-8192");
    }

    #[test]
    fn test_observability_aliases() {
        let json = r#"{ "observability": { "level": "debug", "format": "json" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "models": [ { "id": "small", "name": "Small", "model": "llama-3.1-8b-instant" } ] }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.models, vec![ModelConfig::new("small", "Small", "llama-3.1-8b-instant")]);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "7000"),
            ("RELAY_BIND_ADDRESS", "0.0.0.0"),
            ("RELAY_LOG_LEVEL", "debug"),
            ("GROQ_API_KEY", "gsk_test"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.network.port, 7000);
        assert_eq!(config.listen_addr().unwrap().to_string(), "0.0.0.0:7000");
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.secrets.api_key.as_deref(), Some("gsk_test"));
    }

    #[test]
    fn test_ipv6_bind_address() {
        let mut config = Config::default();
        config.network.bind = "::".into();
        config.network.port = 5000;
        assert!(config.validate().is_ok());

        let addr = config.listen_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.to_string(), "[::]:5000");

        config.network.bind = "::1".into();
        assert_eq!(config.listen_addr().unwrap().to_string(), "[::1]:5000");
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = Config::default();
        config.network.bind = "localhost:80".into();
        let err = config.listen_addr().unwrap_err();
        assert!(err.to_string().contains("Invalid bind address"));
    }

    #[test]
    fn test_relay_port_beats_port() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| match k {
            "RELAY_PORT" => Some("6001".into()),
            "PORT" => Some("6002".into()),
            _ => None,
        });
        assert_eq!(config.network.port, 6001);
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "GROQ_API_KEY").then(|| "  ".to_string()));
        assert!(config.secrets.api_key.is_none());
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let secrets = SecretsConfig {
            api_key: Some("gsk_very_secret".into()),
        };
        let printed = format!("{secrets:?}");
        assert!(!printed.contains("gsk_very_secret"));
        assert!(printed.contains("redacted"));
    }
}
