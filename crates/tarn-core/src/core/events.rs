//! Event notifications and tool output envelopes.
//!
//! `WorkspaceEvent`s are published on a process-wide broadcast channel:
//! file-level notifications on every successful patch-set apply step, and
//! cancellation notifications keyed by tool call id.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    FileCreated { path: PathBuf },
    FileModified { path: PathBuf },
    FileRenamed { from: PathBuf, to: PathBuf },
    /// Cooperative cancellation requested for an in-flight tool call.
    ToolCancelled { tool_call_id: String },
}

/// Broadcast bus for workspace events.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkspaceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, event: WorkspaceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Error code used for cooperatively cancelled tool calls.
const CANCELED_ERROR_CODE: &str = "canceled";

/// Structured envelope for tool outputs.
///
/// - Success: `{"ok": true, "data": { ... }}`
/// - Failure: `{"ok": false, "error": {"code", "message", "details"?}}`
/// - Canceled serializes as a failure with `code: "canceled"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Success { data: Value },
    Failure { error: ToolError },
    Canceled { message: String },
}

/// Error details for a failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ToolOutput {
    pub fn success(data: Value) -> Self {
        ToolOutput::Success { data }
    }

    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        ToolOutput::Failure {
            error: ToolError {
                code: code.into(),
                message: message.into(),
                details,
            },
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        ToolOutput::Canceled {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutput::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolOutput::Success { data } => Some(data),
            ToolOutput::Failure { .. } | ToolOutput::Canceled { .. } => None,
        }
    }

    /// Returns `(code, message, details)` for failures.
    pub fn error_info(&self) -> Option<(&str, &str, Option<&str>)> {
        match self {
            ToolOutput::Failure { error } => Some((
                error.code.as_str(),
                error.message.as_str(),
                error.details.as_deref(),
            )),
            _ => None,
        }
    }

    /// Renders the envelope as the JSON string sent back to the model.
    pub fn to_json_string(&self) -> String {
        let value = match self {
            ToolOutput::Success { data } => json!({"ok": true, "data": data}),
            ToolOutput::Failure { error } => json!({"ok": false, "error": error}),
            ToolOutput::Canceled { message } => json!({
                "ok": false,
                "error": {"code": CANCELED_ERROR_CODE, "message": message},
            }),
        };
        value.to_string()
    }

    /// Parses an envelope back from its JSON form.
    ///
    /// Canceled outputs round-trip through the failure shape: a failure with
    /// `code: "canceled"` deserializes to the `Canceled` variant.
    ///
    /// # Errors
    /// Fails when the string is not a valid envelope.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            ok: bool,
            #[serde(default)]
            data: Option<Value>,
            #[serde(default)]
            error: Option<ToolError>,
        }

        let raw: Raw = serde_json::from_str(s)?;
        if raw.ok {
            return Ok(ToolOutput::Success {
                data: raw.data.unwrap_or(Value::Null),
            });
        }
        let error = raw.error.unwrap_or(ToolError {
            code: "unknown".to_string(),
            message: "Unknown error".to_string(),
            details: None,
        });
        if error.code == CANCELED_ERROR_CODE {
            Ok(ToolOutput::Canceled {
                message: error.message,
            })
        } else {
            Ok(ToolOutput::Failure { error })
        }
    }
}

/// Result of one tool call, positioned to match its input call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn from_output(tool_call_id: String, output: &ToolOutput) -> Self {
        Self {
            tool_call_id,
            content: output.to_json_string(),
            is_error: !output.is_ok(),
        }
    }
}
