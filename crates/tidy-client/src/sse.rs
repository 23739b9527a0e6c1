//! Server-sent event decoding for the chat and task streams.
//!
//! Frames are `data:` lines terminated by a blank line. `\r\n` line endings,
//! multi-line `data:` payloads and `:` comment lines (heartbeats) are
//! accepted. Each frame is decoded on its own; a frame that does not parse is
//! skipped rather than ending the stream.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tidy_types::{StreamEvent, TaskNotification};
use tidy_wire::{classify_task_frame, ChatStreamFrame};

use crate::ClientError;

pub const DONE_MARKER: &str = "[DONE]";

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;
pub type TaskEventStream =
    Pin<Box<dyn Stream<Item = Result<TaskNotification, ClientError>> + Send>>;

/// Byte accumulator that hands out complete SSE frames.
///
/// Bytes are kept raw until a frame is complete so a multi-byte character
/// split across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    pub fn next_frame(&mut self) -> Option<String> {
        let (end, delimiter_len) = find_frame_end(&self.pending)?;
        let frame = String::from_utf8_lossy(&self.pending[..end]).into_owned();
        self.pending.drain(..end + delimiter_len);
        Some(frame)
    }

    /// Drain a trailing frame the server closed without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn find_frame_end(bytes: &[u8]) -> Option<(usize, usize)> {
    (0..bytes.len()).find_map(|i| {
        if bytes[i] != b'\n' {
            return None;
        }
        match (bytes.get(i + 1), bytes.get(i + 2)) {
            (Some(b'\n'), _) => Some((i, 2)),
            (Some(b'\r'), Some(b'\n')) => Some((i, 3)),
            _ => None,
        }
    })
}

/// Joined `data:` payload of one frame, or `None` for comment-only frames.
pub fn frame_data(frame: &str) -> Option<String> {
    let lines = frame
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub fn decode_chat_frame(data: &str) -> Option<StreamEvent> {
    if data.trim() == DONE_MARKER {
        return Some(StreamEvent::Done);
    }
    match serde_json::from_str::<ChatStreamFrame>(data) {
        Ok(frame) => frame.into_event(),
        Err(err) => {
            tracing::debug!("skipping malformed chat frame: {}", err);
            None
        }
    }
}

pub fn decode_task_frame(data: &str, task_id: &str) -> Option<TaskNotification> {
    match serde_json::from_str::<Value>(data) {
        Ok(value) => classify_task_frame(&value, task_id),
        Err(err) => {
            tracing::debug!(task_id, "skipping malformed task frame: {}", err);
            None
        }
    }
}

/// Frame payloads of a byte stream. A transport failure is yielded once as
/// `Err` and ends the sequence; a clean close just ends it.
pub fn sse_payloads<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    async_stream::stream! {
        let mut buffer = SseBuffer::default();
        futures::pin_mut!(bytes);

        while let Some(chunk_result) = bytes.next().await {
            match chunk_result {
                Ok(chunk) => {
                    buffer.push(chunk.as_ref());
                    while let Some(frame) = buffer.next_frame() {
                        if let Some(data) = frame_data(&frame) {
                            yield Ok(data);
                        }
                    }
                }
                Err(err) => {
                    let err: ClientError = err.into();
                    tracing::warn!("SSE stream error: {}", err);
                    yield Err(err);
                    return;
                }
            }
        }

        if let Some(data) = buffer.finish().as_deref().and_then(frame_data) {
            yield Ok(data);
        }
        tracing::debug!("SSE stream ended");
    }
}

/// Decode a chat completion stream. The sequence ends after `done`, after an
/// `error` event, after a transport failure, or when the body closes.
pub fn decode_chat_stream<S, B, E>(bytes: S) -> ChatEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let payloads = sse_payloads(bytes);
    Box::pin(async_stream::stream! {
        futures::pin_mut!(payloads);
        while let Some(item) = payloads.next().await {
            match item {
                Ok(data) => {
                    let Some(event) = decode_chat_frame(&data) else {
                        continue;
                    };
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        break;
                    }
                }
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    })
}

/// Decode the task progress stream into notifications for `task_id`.
pub fn decode_task_stream<S, B, E>(bytes: S, task_id: impl Into<String>) -> TaskEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let task_id = task_id.into();
    Box::pin(sse_payloads(bytes).filter_map(move |item| {
        let notification = match item {
            Ok(data) => decode_task_frame(&data, &task_id).map(Ok),
            Err(err) => Some(Err(err)),
        };
        futures::future::ready(notification)
    }))
}
