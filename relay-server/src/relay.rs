//! The streaming relay.
//!
//! A chat turn moves through
//!
//! ```text
//! Validating → Streaming → Finalizing → Completed
//!      │            │
//!      └────────────┴──────────────────→ Failed
//! ```
//!
//! Validation failures are returned to the caller directly and leave no
//! trace in the session store. Once validation passes the user turn is
//! stored and a frame channel is handed back; from then on every outcome,
//! including an upstream refusal or an upstream that never answers, is
//! reported as a terminal frame.
//!
//! Input is taken as sent: a message is rejected only when empty, and the
//! default model and session apply only when the field is absent.
//!
//! The pump task owns the upstream stream. Dropping the frame receiver
//! cancels it: the task notices the closed channel, drops the upstream
//! stream and stores nothing further.

use crate::context::ContextPolicy;
use crate::provider::{CompletionClient, CompletionRequest, StreamEvent};
use crate::registry::{Credential, CredentialStore, ModelDescriptor, ModelRegistry};
use crate::session::{SessionStore, Turn};
use crate::sse::Frame;
use futures_util::StreamExt;
use relay_common::{Config, Error, ErrorKind};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Model used when a request names none.
pub const DEFAULT_MODEL: &str = "llama-3-70b";

/// Lifecycle phase of one chat turn, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Validating,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl RelayPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat request as received from the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// How a pump task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The end marker arrived and the assistant turn was stored
    Completed { content: String, fragments: usize },
    /// A terminal error frame was sent
    Failed(ErrorKind),
    /// The caller went away mid-stream
    Cancelled,
}

/// An accepted chat turn: frames to forward plus the task producing them.
#[derive(Debug)]
pub struct ChatStream {
    pub session_id: String,
    pub frames: mpsc::Receiver<Frame>,
    pub task: JoinHandle<RelayOutcome>,
}

/// Per-request generation and streaming settings.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub temperature: f64,
    pub max_tokens: i64,
    /// Longest gap allowed between upstream events
    pub idle_timeout: Duration,
    /// Frames buffered between the pump task and the caller
    pub channel_capacity: usize,
    pub default_session_id: String,
    pub default_model: String,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let default_model = if config.models.iter().any(|m| m.id == DEFAULT_MODEL) {
            DEFAULT_MODEL.to_string()
        } else {
            config
                .models
                .first()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string())
        };

        Self {
            temperature: config.upstream.temperature,
            max_tokens: config.upstream.max_tokens,
            idle_timeout: Duration::from_secs(config.upstream.idle_timeout_secs),
            channel_capacity: config.upstream.channel_capacity.max(1),
            default_session_id: config.session.default_session_id.clone(),
            default_model,
        }
    }
}

/// Relay service object shared by all handlers.
pub struct Relay {
    sessions: SessionStore,
    models: ModelRegistry,
    credentials: CredentialStore,
    client: Arc<dyn CompletionClient>,
    policy: ContextPolicy,
    settings: RelaySettings,
}

impl Relay {
    /// Build a relay from configuration.
    ///
    /// A configured `secrets.api_key` seeds the credential; a malformed one
    /// is ignored with a warning.
    pub fn new(config: &Config, client: Arc<dyn CompletionClient>) -> Self {
        let credentials = match config.secrets.api_key.as_deref().map(Credential::parse) {
            Some(Ok(credential)) => CredentialStore::with_credential(credential),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring configured API key");
                CredentialStore::new()
            }
            None => CredentialStore::new(),
        };

        Self {
            sessions: SessionStore::new(),
            models: ModelRegistry::from_config(&config.models),
            credentials,
            client,
            policy: ContextPolicy::from_config(&config.session),
            settings: RelaySettings::from_config(config),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Replace the upstream credential.
    pub async fn set_credential(&self, value: &str) -> Result<(), Error> {
        self.credentials.set(value).await?;
        info!("API key updated");
        Ok(())
    }

    pub async fn has_credential(&self) -> bool {
        self.credentials.is_set().await
    }

    /// Drop a session's history. Unknown sessions are a no-op.
    pub async fn clear_session(&self, session_id: Option<&str>) -> bool {
        let session_id = self.session_or_default(session_id);
        let existed = self.sessions.clear(&session_id).await;
        let remaining = self.sessions.session_count().await;
        info!(session_id = %session_id, existed, remaining, "Session cleared");
        existed
    }

    /// Session ids are opaque keys; only an absent id falls back.
    fn session_or_default(&self, session_id: Option<&str>) -> String {
        session_id
            .unwrap_or(&self.settings.default_session_id)
            .to_string()
    }

    fn validate_model(&self, model: Option<&str>) -> Result<ModelDescriptor, Error> {
        let key = model.unwrap_or(&self.settings.default_model);
        self.models
            .resolve(key)
            .cloned()
            .ok_or_else(|| Error::Validation("Invalid model selected".into()))
    }

    /// Validate a chat turn and, if it passes, start streaming it.
    ///
    /// An `Err` means nothing was stored and no channel was opened. On `Ok`
    /// the user turn is already in the session.
    pub async fn start_chat(self: &Arc<Self>, request: ChatTurnRequest) -> Result<ChatStream, Error> {
        debug!(phase = %RelayPhase::Validating, "Chat request received");

        let credential = self.credentials.get().await.ok_or(Error::MissingCredential)?;
        if request.message.is_empty() {
            return Err(Error::Validation("Message is required".into()));
        }
        let model = self.validate_model(request.model.as_deref())?;
        let session_id = self.session_or_default(request.session_id.as_deref());

        self.sessions.append(&session_id, Turn::user(request.message)).await;

        let history = self.sessions.get_context(&session_id).await;
        let window = self.policy.window(&history);
        debug!(
            phase = %RelayPhase::Streaming,
            session_id = %session_id,
            history_turns = window.history_len(),
            max_turns = self.policy.max_turns(),
            "Context window built"
        );

        let completion = CompletionRequest {
            model: model.provider_model.clone(),
            messages: window.into_turns(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let span = tracing::info_span!("relay", session_id = %session_id, model = %model.id);
        let relay = Arc::clone(self);
        let pump_session = session_id.clone();
        let task = tokio::spawn(
            async move { relay.pump(pump_session, credential, completion, tx).await }.instrument(span),
        );

        Ok(ChatStream {
            session_id,
            frames: rx,
            task,
        })
    }

    async fn pump(
        &self,
        session_id: String,
        credential: Credential,
        request: CompletionRequest,
        tx: mpsc::Sender<Frame>,
    ) -> RelayOutcome {
        let idle = self.settings.idle_timeout;
        let opened = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!("Caller disconnected before upstream opened");
                return RelayOutcome::Cancelled;
            }
            opened = tokio::time::timeout(idle, self.client.stream_completion(&credential, request)) => opened,
        };
        drop(credential);

        let mut upstream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(&tx, e.into(), 0).await,
            Err(_) => {
                let err = Error::Transport(format!(
                    "upstream did not respond within {}s",
                    idle.as_secs_f64()
                ));
                return self.fail(&tx, err, 0).await;
            }
        };

        let mut content = String::new();
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    info!(fragments, "Caller disconnected, dropping upstream stream");
                    return RelayOutcome::Cancelled;
                }
                next = tokio::time::timeout(idle, upstream.next()) => next,
            };

            let event = match next {
                Err(_) => {
                    let err = Error::Transport(format!(
                        "no upstream event within {}s",
                        idle.as_secs_f64()
                    ));
                    return self.fail(&tx, err, fragments).await;
                }
                Ok(None) => {
                    let err = Error::Transport("upstream stream ended without an end marker".into());
                    return self.fail(&tx, err, fragments).await;
                }
                Ok(Some(Err(e))) => return self.fail(&tx, e.into(), fragments).await,
                Ok(Some(Ok(event))) => event,
            };

            match event {
                StreamEvent::Fragment(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    // Only what reached the channel counts toward the stored turn
                    if tx.send(Frame::Content(text.clone())).await.is_err() {
                        info!(fragments, "Caller disconnected, dropping upstream stream");
                        return RelayOutcome::Cancelled;
                    }
                    content.push_str(&text);
                    fragments += 1;
                }
                StreamEvent::End => {
                    debug!(phase = %RelayPhase::Finalizing, fragments, "Upstream finished");
                    self.sessions
                        .append(&session_id, Turn::assistant(content.clone()))
                        .await;
                    let stored_turns = self.sessions.turn_count(&session_id).await;

                    if tx.send(Frame::Done).await.is_err() {
                        debug!("Caller gone before the done frame");
                    }
                    info!(
                        phase = %RelayPhase::Completed,
                        fragments,
                        chars = content.chars().count(),
                        stored_turns,
                        "Chat turn completed"
                    );
                    return RelayOutcome::Completed { content, fragments };
                }
            }
        }
    }

    async fn fail(&self, tx: &mpsc::Sender<Frame>, error: Error, fragments: usize) -> RelayOutcome {
        warn!(
            phase = %RelayPhase::Failed,
            code = error.code(),
            error = %error,
            fragments,
            "Chat turn failed"
        );
        let kind = error.kind();
        if tx.send(Frame::Error(error.caller_message())).await.is_err() {
            debug!("Caller gone before the error frame");
        }
        RelayOutcome::Failed(kind)
    }
}
