//! Provider tests against a mock OpenAI-compatible upstream.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use futures_util::StreamExt;
use relay_common::config::Config;
use relay_server::{
    build_router,
    provider::{
        AuthStyle, CompatibleProvider, CompletionClient, CompletionRequest, ProviderError,
        StreamEvent,
    },
    registry::Credential,
    session::Turn,
    sse::{Frame, SseParser},
    Relay,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn parse_frames(body: &[u8]) -> Vec<Frame> {
    SseParser::new()
        .feed(body)
        .unwrap()
        .iter()
        .map(|data| Frame::from_json(data).unwrap())
        .collect()
}

fn provider_for(server: &MockServer) -> CompatibleProvider {
    CompatibleProvider::new("groq", &server.uri(), AuthStyle::Bearer, Duration::from_secs(5))
}

fn credential() -> Credential {
    Credential::parse("gsk_test").unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "llama3-70b-8192".into(),
        messages: vec![Turn::system("You are helpful"), Turn::user("2+2?")],
        temperature: 0.7,
        max_tokens: 4096,
    }
}

fn sse_body(fragments: &[&str], done: bool) -> String {
    let mut body = String::new();
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for fragment in fragments {
        let chunk = json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn collect(
    provider: &CompatibleProvider,
) -> Result<Vec<Result<StreamEvent, ProviderError>>, ProviderError> {
    let stream = provider.stream_completion(&credential(), request()).await?;
    Ok(stream.collect().await)
}

#[tokio::test]
async fn test_streams_fragments_with_expected_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_eq("authorization", "Bearer gsk_test"))
        .and(body_partial_json(json!({
            "model": "llama3-70b-8192",
            "stream": true,
            "temperature": 0.7,
            "max_tokens": 4096,
            "messages": [
                {"role": "system", "content": "You are helpful"},
                {"role": "user", "content": "2+2?"}
            ]
        })))
        .respond_with(event_stream(sse_body(&["2 + 2", " = 4"], true)))
        .expect(1)
        .mount(&server)
        .await;

    let events = collect(&provider_for(&server)).await.unwrap();
    let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();

    assert_eq!(
        events,
        vec![
            StreamEvent::Fragment("2 + 2".into()),
            StreamEvent::Fragment(" = 4".into()),
            StreamEvent::End
        ]
    );
}

#[tokio::test]
async fn test_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    match collect(&provider_for(&server)).await {
        Err(ProviderError::Auth { status, detail }) => {
            assert_eq!(status, 401);
            assert_eq!(detail, "Invalid API Key");
        }
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_too_many_requests_is_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    assert!(matches!(
        collect(&provider_for(&server)).await,
        Err(ProviderError::RateLimited { .. })
    ));
}

#[tokio::test]
async fn test_server_error_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    assert!(matches!(
        collect(&provider_for(&server)).await,
        Err(ProviderError::Upstream {
            status: Some(500),
            ..
        })
    ));
}

#[tokio::test]
async fn test_error_chunk_mid_stream() {
    let server = MockServer::start().await;
    let mut body = sse_body(&["partial"], false);
    body.push_str("data: {\"error\":{\"message\":\"model overloaded\"}}\n\n");
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let events = collect(&provider_for(&server)).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Fragment("partial".into()));
    assert!(matches!(events[1], Err(ProviderError::Upstream { .. })));
}

#[tokio::test]
async fn test_truncated_stream_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(event_stream(sse_body(&["a", "b"], false)))
        .mount(&server)
        .await;

    let events = collect(&provider_for(&server)).await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], Err(ProviderError::Transport(_))));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Nothing listens on port 1
    let provider = CompatibleProvider::new(
        "groq",
        "http://127.0.0.1:1",
        AuthStyle::Bearer,
        Duration::from_secs(2),
    );

    assert!(matches!(
        collect(&provider).await,
        Err(ProviderError::Transport(_))
    ));
}

#[tokio::test]
async fn test_custom_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_eq("x-api-key", "gsk_test"))
        .respond_with(event_stream(sse_body(&["ok"], true)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = CompatibleProvider::new(
        "custom",
        &server.uri(),
        AuthStyle::XApiKey,
        Duration::from_secs(5),
    );
    let events = collect(&provider).await.unwrap();
    assert_eq!(events.last().unwrap().as_ref().unwrap(), &StreamEvent::End);
}

#[tokio::test]
async fn test_relay_end_to_end_against_mock_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_eq("authorization", "Bearer gsk_e2e"))
        .and(body_partial_json(json!({"model": "mixtral-8x7b-32768", "stream": true})))
        .respond_with(event_stream(sse_body(&["Hello", ", ", "world"], true)))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.upstream.base_url = server.uri();
    config.secrets.api_key = Some("gsk_e2e".into());

    let provider = CompatibleProvider::from_config(&config.upstream);
    let relay = Arc::new(Relay::new(&config, Arc::new(provider)));
    let app = build_router(relay.clone());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"message": "hi", "model": "mixtral-8x7b", "sessionId": "e2e"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    assert_eq!(
        parse_frames(&body),
        vec![
            Frame::Content("Hello".into()),
            Frame::Content(", ".into()),
            Frame::Content("world".into()),
            Frame::Done
        ]
    );
    assert_eq!(
        relay.sessions().get_context("e2e").await,
        vec![Turn::user("hi"), Turn::assistant("Hello, world")]
    );
}
