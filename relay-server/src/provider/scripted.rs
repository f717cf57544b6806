//! In-process completion client that replays canned responses.
//!
//! Used to run the relay without network access. Each call consumes the next
//! queued [`Script`]; once the queue is empty the client echoes the last user
//! message back word by word.

use super::{CompletionClient, CompletionRequest, FragmentStream, ProviderError, StreamEvent};
use crate::registry::Credential;
use crate::session::Role;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One scripted upstream behaviour.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then end normally
    Reply(Vec<String>),
    /// Refuse the request before streaming
    FailOnOpen(ProviderError),
    /// Stream these fragments, then fail
    FailAfter(Vec<String>, ProviderError),
    /// Stream these fragments, then go silent forever
    Hang(Vec<String>),
    /// Accept the request but never answer it
    Stall,
}

impl Script {
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Reply(fragments.into_iter().map(Into::into).collect())
    }
}

/// Completion client driven by a queue of [`Script`]s.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
    dropped: Arc<AtomicUsize>,
}

/// Counts a handed-out stream as released when the holder drops it.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Streams that have been handed out and since dropped.
    pub fn dropped_streams(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn tracked<S>(&self, events: S) -> FragmentStream
    where
        S: futures_util::Stream<Item = Result<StreamEvent, ProviderError>> + Send + 'static,
    {
        let guard = ReleaseGuard(Arc::clone(&self.dropped));
        Box::pin(events.map(move |event| {
            let _held = &guard;
            event
        }))
    }

    fn echo(request: &CompletionRequest) -> Script {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .unwrap_or_default();

        let reply = format!("Echo: {last_user}");
        Script::reply(reply.split_inclusive(' '))
    }
}

fn fragments(parts: Vec<String>) -> impl futures_util::Stream<Item = Result<StreamEvent, ProviderError>> {
    stream::iter(
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| Ok(StreamEvent::Fragment(p))),
    )
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        _credential: &Credential,
        request: CompletionRequest,
    ) -> Result<FragmentStream, ProviderError> {
        let script = self.scripts.lock().await.pop_front();
        let script = script.unwrap_or_else(|| Self::echo(&request));
        self.requests.lock().await.push(request);

        match script {
            Script::Reply(parts) => Ok(self.tracked(
                fragments(parts).chain(stream::once(async { Ok(StreamEvent::End) })),
            )),
            Script::FailOnOpen(err) => Err(err),
            Script::FailAfter(parts, err) => Ok(self.tracked(
                fragments(parts).chain(stream::once(async move { Err(err) })),
            )),
            Script::Hang(parts) => Ok(self.tracked(fragments(parts).chain(stream::pending()))),
            Script::Stall => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Turn;

    fn request(message: &str) -> CompletionRequest {
        CompletionRequest {
            model: "test-model".into(),
            messages: vec![Turn::system("sys"), Turn::user(message)],
            temperature: 0.7,
            max_tokens: 16,
        }
    }

    fn credential() -> Credential {
        Credential::parse("test-key").unwrap()
    }

    #[tokio::test]
    async fn echoes_when_queue_is_empty() {
        let client = ScriptedClient::new();
        let stream = client
            .stream_completion(&credential(), request("hello world"))
            .await
            .unwrap();
        let events: Vec<_> = stream.map(Result::unwrap).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Echo: ".into()),
                StreamEvent::Fragment("hello ".into()),
                StreamEvent::Fragment("world".into()),
                StreamEvent::End
            ]
        );
        assert_eq!(client.request_count().await, 1);
        assert_eq!(client.dropped_streams(), 1);
    }

    #[tokio::test]
    async fn hanging_stream_counts_as_dropped_only_once_released() {
        let client = ScriptedClient::with_scripts([Script::Hang(vec!["a".into()])]);
        let mut stream = client
            .stream_completion(&credential(), request("x"))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), StreamEvent::Fragment("a".into()));
        assert_eq!(client.dropped_streams(), 0);
        drop(stream);
        assert_eq!(client.dropped_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_never_opens() {
        let client = ScriptedClient::with_scripts([Script::Stall]);
        let opened = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            client.stream_completion(&credential(), request("x")),
        )
        .await;
        assert!(opened.is_err());
        assert_eq!(client.request_count().await, 1);
    }

    #[tokio::test]
    async fn replays_scripts_in_order() {
        let client = ScriptedClient::with_scripts([
            Script::FailOnOpen(ProviderError::from_status(429, "slow down")),
            Script::FailAfter(vec!["a".into()], ProviderError::Transport("reset".into())),
        ]);

        let first = client.stream_completion(&credential(), request("1")).await;
        assert!(matches!(first, Err(ProviderError::RateLimited { .. })));

        let second = client
            .stream_completion(&credential(), request("2"))
            .await
            .unwrap();
        let events: Vec<_> = second.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ProviderError::Transport(_))));

        let requests = client.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages[1].content, "2");
    }
}
