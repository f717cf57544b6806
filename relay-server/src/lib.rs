//! Chat Relay - streams LLM completions to callers with per-session history.
//!
//! This crate provides the relay service:
//! - In-memory session history and bounded context windows
//! - Model table and upstream credential
//! - OpenAI-compatible streaming provider client
//! - The streaming relay state machine and SSE framing
//! - HTTP routes
//!
//! ## Architecture
//!
//! ```text
//! Caller → /chat → Relay (validate → store user turn → context window)
//!                    ↓
//!              pump task ← upstream fragments
//!                    ↓
//!        SSE frames → caller, assistant turn → SessionStore
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod context;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod session;
pub mod sse;

pub use context::{ContextPolicy, ContextWindow};
pub use provider::{
    AuthStyle, CompatibleProvider, CompletionClient, CompletionRequest, FragmentStream,
    ProviderError, Script, ScriptedClient, StreamEvent,
};
pub use registry::{Credential, CredentialStore, ModelDescriptor, ModelRegistry};
pub use relay::{ChatStream, ChatTurnRequest, Relay, RelayOutcome, RelayPhase, RelaySettings};
pub use session::{Role, SessionStore, Turn};
pub use sse::{Frame, SseError, SseParser};

use axum::Router;
use relay_common::config::Config;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the relay router with all routes and middleware.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(relay)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
}

/// Start the relay server against the configured upstream.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;

    let provider = CompatibleProvider::from_config(&config.upstream);
    tracing::info!(
        provider = provider.name(),
        base_url = %provider.base_url(),
        "Upstream configured"
    );

    let relay = Arc::new(Relay::new(config, Arc::new(provider)));
    if !relay.has_credential().await {
        tracing::warn!("No API key configured; /set-credential must be called before chatting");
    }

    let router = build_router(relay);

    tracing::info!("Starting Chat Relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
