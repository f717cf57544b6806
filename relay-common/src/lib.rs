//! Relay Common - shared configuration, errors, and logging for the chat relay.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - The caller-facing error taxonomy
//! - Logging setup and request trace context

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, ModelConfig, NetworkConfig, ObservabilityConfig, SecretsConfig, SessionConfig,
    UpstreamConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

