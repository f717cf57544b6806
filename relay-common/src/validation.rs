//! Configuration validation.
//!
//! Checks every section of [`Config`] and reports all problems at once so a
//! bad config file can be fixed in one pass.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{
    Config, ModelConfig, NetworkConfig, ObservabilityConfig, SessionConfig, UpstreamConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let sections: [&dyn Validate; 4] = [
            &self.network,
            &self.upstream,
            &self.session,
            &self.observability,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        if let Err(e) = validate_models(&self.models) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "network.port".into(),
            });
        }
        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "network.bind".into(),
                reason: format!("not an IP address: {}", self.bind),
            });
        }
        Ok(())
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ValidationError::InvalidValue {
                    field: "upstream.base_url".into(),
                    reason: format!("must be an http(s) URL, got {}", self.base_url),
                });
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "upstream.temperature".into(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }

        if self.max_tokens < 1 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.channel_capacity == 0 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.channel_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.idle_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.idle_timeout_secs".into(),
                reason: "timeouts must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.context_turns == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.context_turns".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.default_session_id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "session.default_session_id".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

fn validate_models(models: &[ModelConfig]) -> ValidationResult<()> {
    if models.is_empty() {
        return Err(ValidationError::MissingField {
            field: "models".into(),
        });
    }

    let mut seen = HashSet::new();
    for model in models {
        if model.id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "models[].id".into(),
            });
        }
        if model.model.is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("models[{}].model", model.id),
            });
        }
        if !seen.insert(model.id.as_str()) {
            return Err(ValidationError::Conflict {
                reason: format!("model id {} is defined more than once", model.id),
            });
        }
    }

    Ok(())
}
