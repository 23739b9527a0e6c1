use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tidy_client::{ChatApi, ClientError};
use tidy_types::{ChatTurn, StreamEvent};
use tidy_wire::ChatRequest;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;

/// How a turn's assistant placeholder was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream reached `done` (or closed cleanly after content).
    Streamed,
    /// The stream failed and the non-streaming reply was used instead.
    Fallback,
    /// Both attempts failed; the placeholder holds an error string.
    Failed,
    /// The session was reset while the turn was in flight.
    Abandoned,
}

enum StreamAttempt {
    Completed,
    Empty,
    Failed(String),
}

struct TurnState {
    generation: u64,
    in_flight: Option<u64>,
    cancel: CancellationToken,
}

/// One chat transcript and the streaming turns that append to it.
///
/// Renderers subscribe to transcript snapshots; every change replaces the
/// whole snapshot, so re-rendering the latest value is always correct.
pub struct ChatStreamSession {
    api: Arc<dyn ChatApi>,
    provider: Option<String>,
    transcript: watch::Sender<Vec<ChatTurn>>,
    turn: Mutex<TurnState>,
}

impl ChatStreamSession {
    pub fn new(api: Arc<dyn ChatApi>, provider: Option<String>) -> Self {
        let (transcript, _) = watch::channel(Vec::new());
        Self {
            api,
            provider,
            transcript,
            turn: Mutex::new(TurnState {
                generation: 0,
                in_flight: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatTurn>> {
        self.transcript.subscribe()
    }

    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.transcript.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.with_turn(|turn| turn.in_flight == Some(turn.generation))
    }

    /// Clear the transcript and abandon any in-flight turn.
    pub fn reset(&self) {
        self.with_turn(|turn| {
            turn.generation += 1;
            turn.in_flight = None;
            turn.cancel.cancel();
            turn.cancel = CancellationToken::new();
        });
        self.transcript.send_replace(Vec::new());
        tracing::debug!("chat session reset");
    }

    /// Send one user message and resolve the assistant reply.
    ///
    /// Only validation and concurrent sends are reported as errors; backend
    /// failures end up as text in the assistant turn.
    pub async fn send(&self, message: &str) -> Result<TurnOutcome, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (generation, cancel) = self.with_turn(|turn| {
            if turn.in_flight == Some(turn.generation) {
                return Err(ChatError::Busy);
            }
            turn.in_flight = Some(turn.generation);
            Ok((turn.generation, turn.cancel.clone()))
        })?;
        let _guard = InFlightGuard {
            session: self,
            generation,
        };

        let user = ChatTurn::user(message);
        let placeholder = ChatTurn::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        self.transcript.send_modify(|turns| {
            turns.push(user);
            turns.push(placeholder);
        });

        let request = ChatRequest::new(message, self.provider.clone());
        tracing::debug!(chars = message.chars().count(), "chat turn started");

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(TurnOutcome::Abandoned),
            attempt = self.stream_turn(&request, generation, &placeholder_id) => attempt,
        };

        let reason = match attempt {
            StreamAttempt::Completed => return Ok(TurnOutcome::Streamed),
            StreamAttempt::Empty => {
                self.overwrite(
                    generation,
                    &placeholder_id,
                    "Error: the assistant returned an empty reply".to_string(),
                );
                return Ok(TurnOutcome::Failed);
            }
            StreamAttempt::Failed(reason) => reason,
        };

        tracing::warn!("chat stream failed, retrying without streaming: {}", reason);
        let fallback = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(TurnOutcome::Abandoned),
            result = self.api.chat(&request) => result,
        };

        match fallback {
            Ok(reply) if !reply.message.trim().is_empty() => {
                self.overwrite(generation, &placeholder_id, reply.message);
                Ok(TurnOutcome::Fallback)
            }
            Ok(_) => {
                self.overwrite(
                    generation,
                    &placeholder_id,
                    "Error: the assistant returned an empty reply".to_string(),
                );
                Ok(TurnOutcome::Failed)
            }
            Err(err) => {
                tracing::warn!("chat fallback failed: {}", err);
                self.overwrite(generation, &placeholder_id, format_chat_error(&err));
                Ok(TurnOutcome::Failed)
            }
        }
    }

    async fn stream_turn(
        &self,
        request: &ChatRequest,
        generation: u64,
        placeholder_id: &str,
    ) -> StreamAttempt {
        let mut stream = match self.api.open_chat_stream(request).await {
            Ok(stream) => stream,
            Err(err) => return StreamAttempt::Failed(err.to_string()),
        };

        let mut accumulated = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamEvent::Content(text)) => {
                    accumulated.push_str(&text);
                    self.overwrite(generation, placeholder_id, accumulated.clone());
                }
                Ok(StreamEvent::Error(message)) => return StreamAttempt::Failed(message),
                Ok(StreamEvent::Done) => {
                    return if accumulated.is_empty() {
                        StreamAttempt::Empty
                    } else {
                        StreamAttempt::Completed
                    };
                }
                Err(err) => return StreamAttempt::Failed(err.to_string()),
            }
        }

        // Closed without a marker: fine if something arrived.
        if accumulated.is_empty() {
            StreamAttempt::Failed("stream closed before any content".to_string())
        } else {
            StreamAttempt::Completed
        }
    }

    fn overwrite(&self, generation: u64, turn_id: &str, content: String) -> bool {
        if self.with_turn(|turn| turn.generation) != generation {
            return false;
        }
        self.transcript.send_if_modified(|turns| {
            match turns.iter_mut().find(|turn| turn.id == turn_id) {
                Some(turn) if turn.content != content => {
                    turn.content = content;
                    true
                }
                _ => false,
            }
        })
    }

    fn with_turn<R>(&self, f: impl FnOnce(&mut TurnState) -> R) -> R {
        let mut guard = match self.turn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

struct InFlightGuard<'a> {
    session: &'a ChatStreamSession,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.session.with_turn(|turn| {
            if turn.in_flight == Some(generation) {
                turn.in_flight = None;
            }
        });
    }
}

fn format_chat_error(err: &ClientError) -> String {
    match err {
        ClientError::Status { message, .. } => format!("Error: {}", message),
        other => format!("Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChat;
    use tidy_types::ChatRole;
    use tokio::sync::Semaphore;

    fn contents(session: &ChatStreamSession) -> Vec<(ChatRole, String)> {
        session
            .transcript()
            .into_iter()
            .map(|turn| (turn.role, turn.content))
            .collect()
    }

    #[tokio::test]
    async fn streamed_reply_is_concatenated_into_one_turn() {
        let api = Arc::new(FakeChat::streaming(vec![
            Ok(StreamEvent::Content("Here ".into())),
            Ok(StreamEvent::Content("are ".into())),
            Ok(StreamEvent::Content("your files".into())),
            Ok(StreamEvent::Done),
        ]));
        let session = ChatStreamSession::new(api.clone(), None);

        let outcome = session.send("list files").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Streamed);
        assert_eq!(
            contents(&session),
            vec![
                (ChatRole::User, "list files".to_string()),
                (ChatRole::Assistant, "Here are your files".to_string()),
            ]
        );
        assert_eq!(api.fallback_calls(), 0);
    }

    #[tokio::test]
    async fn done_never_triggers_fallback_even_when_empty() {
        let api = Arc::new(FakeChat::streaming(vec![Ok(StreamEvent::Done)]));
        let session = ChatStreamSession::new(api.clone(), None);

        let outcome = session.send("hello").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(api.fallback_calls(), 0);
        let last = session.transcript().pop().unwrap();
        assert!(last.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn error_after_partial_content_is_replaced_by_fallback_reply() {
        let api = Arc::new(
            FakeChat::streaming(vec![
                Ok(StreamEvent::Content("partial ".into())),
                Ok(StreamEvent::Error("upstream timeout".into())),
            ])
            .with_fallback(Ok("complete answer")),
        );
        let session = ChatStreamSession::new(api.clone(), None);

        let outcome = session.send("hello").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Fallback);
        assert_eq!(api.fallback_calls(), 1);
        assert_eq!(
            contents(&session),
            vec![
                (ChatRole::User, "hello".to_string()),
                (ChatRole::Assistant, "complete answer".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn transport_failure_falls_back_once() {
        let api = Arc::new(
            FakeChat::streaming(vec![
                Ok(StreamEvent::Content("a".into())),
                Err(ClientError::Stream("connection reset".into())),
            ])
            .with_fallback(Ok("recovered")),
        );
        let session = ChatStreamSession::new(api.clone(), None);

        assert_eq!(session.send("hi").await.unwrap(), TurnOutcome::Fallback);
        assert_eq!(api.stream_calls(), 1);
        assert_eq!(api.fallback_calls(), 1);
    }

    #[tokio::test]
    async fn open_failure_and_fallback_failure_leave_error_text() {
        let api = Arc::new(
            FakeChat::open_error(ClientError::Status {
                status: 503,
                message: "provider down".into(),
            })
            .with_fallback(Err(ClientError::Status {
                status: 500,
                message: "still down".into(),
            })),
        );
        let session = ChatStreamSession::new(api.clone(), None);

        let outcome = session.send("hi").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(api.fallback_calls(), 1);
        let turns = session.transcript();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "Error: still down");
        assert!(!turns[1].is_pending());
    }

    #[tokio::test]
    async fn clean_close_without_content_falls_back() {
        let api = Arc::new(FakeChat::streaming(vec![]).with_fallback(Ok("from fallback")));
        let session = ChatStreamSession::new(api.clone(), None);

        assert_eq!(session.send("hi").await.unwrap(), TurnOutcome::Fallback);
        assert_eq!(session.transcript()[1].content, "from fallback");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_call() {
        let api = Arc::new(FakeChat::streaming(vec![Ok(StreamEvent::Done)]));
        let session = ChatStreamSession::new(api.clone(), None);

        assert!(matches!(
            session.send("   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert_eq!(api.stream_calls(), 0);
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected_and_placeholder_is_added_with_user_turn() {
        let (api, feed) = FakeChat::manual();
        let api = Arc::new(api);
        let session = Arc::new(ChatStreamSession::new(api.clone(), None));
        let mut observer = session.subscribe();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send("first").await })
        };

        observer.changed().await.unwrap();
        assert_eq!(observer.borrow_and_update().len(), 2);
        assert!(session.is_busy());
        assert!(matches!(session.send("second").await, Err(ChatError::Busy)));

        feed.unbounded_send(Ok(StreamEvent::Content("ok".into()))).unwrap();
        feed.unbounded_send(Ok(StreamEvent::Done)).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), TurnOutcome::Streamed);
        assert!(!session.is_busy());
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn reset_abandons_in_flight_turn() {
        let (api, feed) = FakeChat::manual();
        let api = Arc::new(api);
        let session = Arc::new(ChatStreamSession::new(api.clone(), None));
        let mut observer = session.subscribe();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send("first").await })
        };
        observer.changed().await.unwrap();

        session.reset();
        assert!(session.transcript().is_empty());
        assert!(!session.is_busy());
        assert_eq!(first.await.unwrap().unwrap(), TurnOutcome::Abandoned);

        // Late events from the abandoned stream change nothing.
        let _ = feed.unbounded_send(Ok(StreamEvent::Content("late".into())));
        assert!(session.transcript().is_empty());
        assert_eq!(api.fallback_calls(), 0);
    }

    async fn wait_for_fallback_calls(api: &FakeChat, calls: usize) {
        while api.fallback_calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reset_during_delayed_fallback_leaves_only_the_new_turn() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(
            FakeChat::open_error(ClientError::Stream("connection refused".into()))
                .with_echo_fallback("late:")
                .with_fallback_gate(gate.clone()),
        );
        let session = Arc::new(ChatStreamSession::new(api.clone(), None));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send("one").await })
        };
        wait_for_fallback_calls(&api, 1).await;

        session.reset();
        assert_eq!(first.await.unwrap().unwrap(), TurnOutcome::Abandoned);

        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.send("two").await })
        };
        wait_for_fallback_calls(&api, 2).await;
        assert_eq!(session.transcript()[1].content, "");

        gate.add_permits(2);
        assert_eq!(second.await.unwrap().unwrap(), TurnOutcome::Fallback);
        assert_eq!(
            contents(&session),
            vec![
                (ChatRole::User, "two".to_string()),
                (ChatRole::Assistant, "late:two".to_string()),
            ]
        );
        assert_eq!(api.stream_calls(), 2);
    }
}
