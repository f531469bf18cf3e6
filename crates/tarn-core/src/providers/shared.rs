//! Backend-agnostic types shared across model backends.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::policy::ConversationMode;
use crate::tools::{ToolCall, ToolDefinition};

/// Standard User-Agent header for tarn API requests.
pub const USER_AGENT: &str = concat!("tarn/", env!("CARGO_PKG_VERSION"));

/// A chat message with owned data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// One model turn sent to a backend.
#[derive(Debug, Clone, Default)]
pub struct BackendRequest {
    /// Ordered conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Free-text context prepended to the system prompt.
    pub context: Option<String>,
    /// Tools the model is allowed to call this turn.
    pub tools: Vec<ToolDefinition>,
    pub mode: Option<ConversationMode>,
    /// Project root the turn operates in.
    pub root: Option<PathBuf>,
}

/// The model's reply to one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Incremental piece of a streaming reply.
///
/// Streaming backends emit text deltas followed by a final `done` chunk.
/// Non-streaming backends satisfy the same contract with a single chunk
/// carrying the whole text and `done = true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: true,
        }
    }
}

/// Callback receiving chunks as a streaming reply arrives.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(StreamChunk) + Send);

/// Error categories for backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP status error (4xx, 5xx).
    HttpStatus,
    /// Connection timeout or request timeout.
    Timeout,
    /// Failed to parse a response (JSON parse error, invalid SSE, etc.).
    Parse,
    /// API-level error returned inside an otherwise successful response.
    ApiError,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::HttpStatus => write!(f, "http_status"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::ApiError => write!(f, "api_error"),
        }
    }
}

/// Structured error from a backend with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display.
    pub message: String,
    /// Optional additional details (e.g., raw error body).
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, surfacing the server's message when the
    /// body is a JSON error object.
    pub fn http_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}");
        let details = if body.is_empty() {
            None
        } else {
            if let Ok(json) = serde_json::from_str::<Value>(body)
                && let Some(error_obj) = json.get("error")
                && let Some(msg) = error_obj.get("message").and_then(|v| v.as_str())
            {
                return Self {
                    kind: ProviderErrorKind::HttpStatus,
                    message: format!("HTTP {status}: {msg}"),
                    details: Some(body.to_string()),
                };
            }
            Some(body.to_string())
        };
        Self {
            kind: ProviderErrorKind::HttpStatus,
            message,
            details,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }

    /// Creates an API error (from a mid-stream or in-body error object).
    pub fn api_error(error_type: &str, message: &str) -> Self {
        Self {
            kind: ProviderErrorKind::ApiError,
            message: format!("{error_type}: {message}"),
            details: None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for backend operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Classifies a reqwest transport error into a provider error.
pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_decode() {
        ProviderError::parse(format!("Failed to decode response: {e}"))
    } else {
        ProviderError::new(ProviderErrorKind::ApiError, format!("Request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_extracts_json_message() {
        let body = r#"{"error": {"message": "model overloaded"}}"#;
        let err = ProviderError::http_status(529, body);
        assert_eq!(err.kind, ProviderErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 529: model overloaded");
        assert_eq!(err.details.as_deref(), Some(body));
    }

    #[test]
    fn test_http_status_plain_body() {
        let err = ProviderError::http_status(500, "internal error");
        assert_eq!(err.message, "HTTP 500");
        assert_eq!(err.details.as_deref(), Some("internal error"));
    }

    #[test]
    fn test_http_status_empty_body() {
        let err = ProviderError::http_status(404, "");
        assert_eq!(err.message, "HTTP 404");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("ok").role, "assistant");
        assert_eq!(ChatMessage::system("rules").content, "rules");
    }

    #[test]
    fn test_stream_chunk_constructors() {
        assert!(!StreamChunk::delta("a").done);
        assert!(StreamChunk::done("full").done);
    }
}
