//! Error types for the chat relay.
//!
//! Every variant maps to one of the caller-visible classifications
//! (validation, auth, rate limit, transport, upstream). The `Display` output
//! carries internal detail and is meant for logs only; callers receive
//! [`Error::caller_message`].

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay services.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing input. The message is safe to show to the caller.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No upstream credential has been configured
    #[error("Upstream credential not set")]
    MissingCredential,

    /// Upstream rejected the credential
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Upstream rate limit hit
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Network or channel failure while talking to the upstream or the caller
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider-reported generation failure
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    RateLimit,
    Transport,
    Upstream,
}

impl Error {
    /// Classify this error for the caller.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::MissingCredential | Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited(_) => ErrorKind::RateLimit,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }

    /// HTTP status code used when the error is reported before a stream opens.
    ///
    /// A missing credential is a 400: the caller has to supply one through the
    /// credential endpoint before chatting.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::MissingCredential => 400,
            Self::Auth(_) => 401,
            Self::RateLimited(_) => 429,
            Self::Transport(_) | Self::Upstream(_) => 502,
        }
    }

    /// Stable machine-readable code, used in logs.
    pub const fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Upstream => "UPSTREAM_ERROR",
        }
    }

    /// Message that may cross the service boundary.
    ///
    /// Never contains upstream payloads or credential material.
    pub fn caller_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::MissingCredential => "API key not set. Please set your API key first.".into(),
            Self::Auth(_) => "Invalid API key. Please check your API key.".into(),
            Self::RateLimited(_) => "Rate limit exceeded. Please try again later.".into(),
            Self::Transport(_) => "Network error. Please check your connection.".into(),
            Self::Upstream(_) => "Error generating response".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::MissingCredential.status_code(), 400);
        assert_eq!(Error::Auth("x".into()).status_code(), 401);
        assert_eq!(Error::RateLimited("x".into()).status_code(), 429);
        assert_eq!(Error::Transport("x".into()).status_code(), 502);
        assert_eq!(Error::Upstream("x".into()).status_code(), 502);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::MissingCredential.kind(), ErrorKind::Auth);
        assert_eq!(Error::Auth("401".into()).kind(), ErrorKind::Auth);
        assert_eq!(Error::RateLimited("429".into()).kind(), ErrorKind::RateLimit);
        assert_eq!(Error::Transport("reset".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::Upstream("boom".into()).code(), "UPSTREAM_ERROR");
    }

    #[test]
    fn test_caller_message_hides_detail() {
        let err = Error::Upstream("model overloaded: secret-payload gsk_abc".into());
        assert!(err.to_string().contains("secret-payload"));
        assert!(!err.caller_message().contains("secret-payload"));

        let err = Error::Auth("bad key gsk_abc".into());
        assert!(!err.caller_message().contains("gsk_abc"));
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = Error::Validation("Message is required".into());
        assert_eq!(err.caller_message(), "Message is required");
    }
}
