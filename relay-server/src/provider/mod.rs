//! Streaming completion providers.
//!
//! The relay talks to the upstream through [`CompletionClient`]. A client
//! opens one streaming request and hands back a stream of [`StreamEvent`]s:
//! zero or more fragments followed by exactly one end marker, or an error.

mod compatible;
mod scripted;

pub use compatible::{AuthStyle, CompatibleProvider};
pub use scripted::{Script, ScriptedClient};

use crate::registry::Credential;
use crate::session::Turn;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

// ============================================================================
// Client Trait
// ============================================================================

/// Interface to an upstream that streams chat completions.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Open a streaming completion.
    ///
    /// Errors returned here happen before any fragment is produced. Errors
    /// yielded by the stream happen after the request was accepted.
    async fn stream_completion(
        &self,
        credential: &Credential,
        request: CompletionRequest,
    ) -> Result<FragmentStream, ProviderError>;
}

/// One item of an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty piece of generated text
    Fragment(String),
    /// The upstream signalled completion
    End,
}

/// Stream of upstream events.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Request for one completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Provider model identifier
    pub model: String,
    /// System instruction followed by the bounded history
    pub messages: Vec<Turn>,
    pub temperature: f64,
    pub max_tokens: i64,
}

// ============================================================================
// Errors
// ============================================================================

/// Error from a provider.
///
/// `detail` fields hold upstream text and stay in logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Credential rejected
    #[error("upstream rejected credential ({status}): {detail}")]
    Auth { status: u16, detail: String },

    /// Too many requests
    #[error("upstream rate limit: {detail}")]
    RateLimited { detail: String },

    /// Connection failure, reset, truncated body or idle timeout
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider reported a generation failure
    #[error("upstream failure (status {status:?}): {detail}")]
    Upstream { status: Option<u16>, detail: String },
}

impl ProviderError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => Self::Auth { status, detail },
            429 => Self::RateLimited { detail },
            _ => Self::Upstream {
                status: Some(status),
                detail,
            },
        }
    }
}

impl From<ProviderError> for relay_common::Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Auth { status, detail } => Self::Auth(format!("{status}: {detail}")),
            ProviderError::RateLimited { detail } => Self::RateLimited(detail),
            ProviderError::Transport(detail) => Self::Transport(detail),
            upstream @ ProviderError::Upstream { .. } => Self::Upstream(upstream.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::ErrorKind;

    #[test]
    fn status_classification() {
        assert!(matches!(ProviderError::from_status(401, "x"), ProviderError::Auth { .. }));
        assert!(matches!(ProviderError::from_status(403, "x"), ProviderError::Auth { .. }));
        assert!(matches!(
            ProviderError::from_status(429, "x"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(500, "x"),
            ProviderError::Upstream { status: Some(500), .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "x"),
            ProviderError::Upstream { status: Some(400), .. }
        ));
    }

    #[test]
    fn converts_to_relay_error_kinds() {
        let kind = |e: ProviderError| relay_common::Error::from(e).kind();
        assert_eq!(kind(ProviderError::from_status(401, "bad key")), ErrorKind::Auth);
        assert_eq!(kind(ProviderError::from_status(429, "slow down")), ErrorKind::RateLimit);
        assert_eq!(kind(ProviderError::Transport("reset".into())), ErrorKind::Transport);
        assert_eq!(kind(ProviderError::from_status(503, "busy")), ErrorKind::Upstream);
    }

    #[test]
    fn caller_message_hides_detail() {
        let err: relay_common::Error = ProviderError::from_status(500, "stack trace here").into();
        assert_eq!(err.caller_message(), "Error generating response");
        assert!(err.to_string().contains("stack trace here"));
    }
}
