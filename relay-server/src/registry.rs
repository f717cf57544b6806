//! Model table and upstream credential.

use relay_common::config::ModelConfig;
use relay_common::Error;
use serde::Serialize;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

// ============================================================================
// Models
// ============================================================================

/// A user-facing model key and the provider model it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// User-facing key
    pub id: String,
    /// Display name
    pub name: String,
    /// Provider model identifier
    #[serde(rename = "model")]
    pub provider_model: String,
}

impl From<&ModelConfig> for ModelDescriptor {
    fn from(config: &ModelConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            provider_model: config.model.clone(),
        }
    }
}

/// Static model table. Read-only once built.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn from_config(models: &[ModelConfig]) -> Self {
        Self::new(models.iter().map(ModelDescriptor::from).collect())
    }

    /// Look up a model by its user-facing key.
    pub fn resolve(&self, key: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == key)
    }

    /// All models in configuration order.
    pub fn list(&self) -> &[ModelDescriptor] {
        &self.models
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Upstream API key. Wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Accept a key that could be sent as a bearer token.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Validation("API key is required".into()));
        }
        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(Error::Validation("Invalid API key format".into()));
        }
        Ok(Self(Zeroizing::new(value.to_string())))
    }

    /// The raw key, for building the authorization header.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Holder for the single process-wide credential.
#[derive(Debug, Default)]
pub struct CredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a credential, e.g. from configuration.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }

    /// Replace the current credential. Last write wins.
    pub async fn set(&self, value: &str) -> Result<(), Error> {
        let credential = Credential::parse(value)?;
        *self.slot.write().await = Some(credential);
        Ok(())
    }

    pub async fn get(&self) -> Option<Credential> {
        self.slot.read().await.clone()
    }

    pub async fn is_set(&self) -> bool {
        self.slot.read().await.is_some()
    }
}
