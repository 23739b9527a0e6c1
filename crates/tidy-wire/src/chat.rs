use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidy_types::StreamEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, provider: Option<String>) -> Self {
        Self {
            message: message.into(),
            provider,
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub provider: Option<String>,
}

/// One `data:` payload of the chat stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamFrame {
    Content {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        provider: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    Done,
}

impl ChatStreamFrame {
    /// Content frames without text carry nothing to render and are dropped.
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            ChatStreamFrame::Content { content, .. } => content
                .filter(|text| !text.is_empty())
                .map(StreamEvent::Content),
            ChatStreamFrame::Error { error } => Some(StreamEvent::Error(
                error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "stream reported an error".to_string()),
            )),
            ChatStreamFrame::Done => Some(StreamEvent::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Option<StreamEvent> {
        serde_json::from_str::<ChatStreamFrame>(raw)
            .ok()
            .and_then(ChatStreamFrame::into_event)
    }

    #[test]
    fn content_frame_keeps_text_and_ignores_provider() {
        assert_eq!(
            decode(r#"{"type":"content","content":"Here ","provider":"claude"}"#),
            Some(StreamEvent::Content("Here ".to_string()))
        );
    }

    #[test]
    fn empty_content_frame_is_dropped() {
        assert_eq!(decode(r#"{"type":"content","content":""}"#), None);
        assert_eq!(decode(r#"{"type":"content"}"#), None);
    }

    #[test]
    fn error_frame_without_text_gets_generic_message() {
        assert_eq!(
            decode(r#"{"type":"error"}"#),
            Some(StreamEvent::Error("stream reported an error".to_string()))
        );
        assert_eq!(
            decode(r#"{"type":"error","error":"rate limited"}"#),
            Some(StreamEvent::Error("rate limited".to_string()))
        );
    }

    #[test]
    fn unknown_frame_type_fails_to_parse() {
        assert!(serde_json::from_str::<ChatStreamFrame>(r#"{"type":"ping"}"#).is_err());
    }
}
