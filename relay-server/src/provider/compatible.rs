//! OpenAI-compatible streaming provider.
//!
//! Groq and most other hosted LLM APIs accept the same
//! `/v1/chat/completions` request and answer a `stream: true` request with an
//! event stream of `chat.completion.chunk` objects terminated by
//! `data: [DONE]`.

use super::{CompletionClient, CompletionRequest, FragmentStream, ProviderError, StreamEvent};
use crate::registry::Credential;
use crate::sse::SseParser;
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use relay_common::config::UpstreamConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

/// Longest upstream error body kept for logs.
const MAX_ERROR_DETAIL: usize = 512;

/// How the provider expects the API key to be sent.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    XApiKey,
}

/// A provider that speaks the OpenAI-compatible chat completions API.
pub struct CompatibleProvider {
    name: String,
    base_url: String,
    auth_style: AuthStyle,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompatibleRequest<'a> {
    model: &'a str,
    messages: Vec<CompatibleMessage<'a>>,
    temperature: f64,
    max_tokens: i64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct CompatibleMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompatibleChunk {
    #[serde(default)]
    choices: Vec<CompatibleChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompatibleChoice {
    #[serde(default)]
    delta: CompatibleDelta,
}

#[derive(Debug, Default, Deserialize)]
struct CompatibleDelta {
    #[serde(default)]
    content: Option<String>,
}

impl CompatibleProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// Only the connect phase is bounded here. A streaming body can legitimately
    /// run for minutes, so the wait for response headers and the gaps between
    /// chunks are policed by the relay's idle timeout.
    pub fn new(name: &str, base_url: &str, auth_style: AuthStyle, connect_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_style,
            client: Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Create a bearer-auth provider from upstream settings.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            "groq",
            &config.base_url,
            AuthStyle::Bearer,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for CompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_completion(
        &self,
        credential: &Credential,
        request: CompletionRequest,
    ) -> Result<FragmentStream, ProviderError> {
        let body = CompatibleRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|turn| CompatibleMessage {
                    role: turn.role.as_str(),
                    content: &turn.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let mut req = self.client.post(self.endpoint()).json(&body);

        let api_key = credential.expose();
        match &self.auth_style {
            AuthStyle::Bearer => {
                req = req.bearer_auth(api_key);
            }
            AuthStyle::XApiKey => {
                req = req.header("x-api-key", api_key);
            }
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                status.as_u16(),
                extract_error_message(&error_text),
            ));
        }

        tracing::debug!(provider = %self.name, model = %request.model, "upstream stream opened");
        Ok(decode_stream(response.bytes_stream()))
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| error_message(&v));

    let mut detail = message.unwrap_or_else(|| body.trim().to_string());
    if detail.len() > MAX_ERROR_DETAIL {
        let mut end = MAX_ERROR_DETAIL;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail.truncate(end);
    }
    detail
}

fn error_message(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error")?;
    match error.get("message").and_then(|m| m.as_str()) {
        Some(message) => Some(message.to_string()),
        None => error.as_str().map(ToString::to_string),
    }
}

/// Decode one `data` payload. `None` means the payload carries nothing.
fn decode_payload(data: &str) -> Option<Result<StreamEvent, ProviderError>> {
    let data = data.trim();
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::End));
    }

    let chunk: CompatibleChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(ProviderError::Upstream {
                status: None,
                detail: format!("malformed stream chunk: {e}"),
            }))
        }
    };

    if let Some(ref error) = chunk.error {
        let detail = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(Err(ProviderError::Upstream { status: None, detail }));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(|content| Ok(StreamEvent::Fragment(content)))
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    parser: SseParser,
    pending: VecDeque<Result<StreamEvent, ProviderError>>,
    finished: bool,
}

/// Turn a raw upstream body into a stream of [`StreamEvent`]s.
///
/// The output ends after the first `End` or error. A body that closes before
/// `[DONE]` yields a transport error, so a truncated response is never
/// mistaken for a complete one.
pub fn decode_stream<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if !matches!(item, Ok(StreamEvent::Fragment(_))) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.parser.feed(chunk.as_ref()) {
                    Ok(events) => {
                        for data in events {
                            if let Some(event) = decode_payload(&data) {
                                state.pending.push_back(event);
                            }
                        }
                    }
                    Err(e) => {
                        state
                            .pending
                            .push_back(Err(ProviderError::Transport(format!("stream decode failed: {e}"))));
                    }
                },
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(ProviderError::Transport(format!("stream read failed: {e}"))));
                }
                None => {
                    state.pending.push_back(Err(ProviderError::Transport(
                        "upstream closed the stream before completion".into(),
                    )));
                }
            }
        }
    }))
}
