//! HTTP routes for the chat relay.
//!
//! Every route is mounted at the root and again under `/api`.

use crate::registry::ModelDescriptor;
use crate::relay::{ChatTurnRequest, Relay};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream;
use relay_common::logging::RequestContext;
use relay_common::request_span;
use relay_common::Error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{warn, Instrument};

const SERVICE_NAME: &str = "chat-relay";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    fn new(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub service: String,
}

/// Model list response.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct SetCredentialRequest {
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearSessionRequest {
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Pre-stream failure rendered as `{error}` with the matching status.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.0.caller_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Routes without state, suitable for mounting at any prefix.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .route("/set-credential", post(set_credential_handler))
        .route("/set-key", post(set_credential_handler))
        .route("/chat", post(chat_handler))
        .route("/clear-session", post(clear_session_handler))
        .route("/clear", post(clear_session_handler))
}

/// Build the complete router.
pub fn build_all_routes(relay: Arc<Relay>) -> Router {
    let api = api_routes();
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(AppState { relay })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".into(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: SERVICE_NAME.into(),
    })
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.relay.models().list().to_vec(),
    })
}

async fn set_credential_handler(
    State(state): State<AppState>,
    payload: Result<Json<SetCredentialRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    // A body that does not parse is treated like a missing key
    let api_key = payload
        .ok()
        .and_then(|Json(body)| body.api_key)
        .unwrap_or_default();

    state.relay.set_credential(&api_key).await?;
    Ok(Json(SuccessResponse::new("API key set successfully")))
}

async fn clear_session_handler(
    State(state): State<AppState>,
    payload: Option<Json<ClearSessionRequest>>,
) -> Json<SuccessResponse> {
    let Json(body) = payload.unwrap_or_default();
    state.relay.clear_session(body.session_id.as_deref()).await;
    Json(SuccessResponse::new("Chat history cleared"))
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatTurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let span = request_span!("chat", ctx.trace_id);

    async move {
        let Json(request) = payload?;

        let chat = state.relay.start_chat(request).await.map_err(|e| {
            warn!(code = e.code(), error = %e, "Chat request rejected");
            ApiError(e)
        })?;

        let events = stream::unfold(chat.frames, |mut frames| async move {
            frames.recv().await.map(|frame| {
                let event = Event::default().data(frame.to_json());
                (Ok::<_, Infallible>(event), frames)
            })
        });

        let mut response_headers = HeaderMap::new();
        ctx.to_headers(&mut response_headers);

        let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL));
        Ok::<_, ApiError>((response_headers, sse).into_response())
    }
    .instrument(span)
    .await
}
