//! Conversation policy: which tools a turn may use.

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCatalog, ToolDefinition};

/// How the conversation is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Question answering; the model may inspect but not mutate.
    Chat,
    /// Full agentic operation with the whole catalog.
    Agent,
}

/// Lifecycle stage of a conversation.
///
/// Accepted by the policy for forward compatibility but currently has no
/// effect on tool availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Planning,
    Executing,
    Reviewing,
}

/// Tools that never mutate the workspace.
const READ_ONLY_TOOLS: &[&str] = &["read"];

/// Returns the tool definitions available to a turn.
///
/// Mode strictly determines the result; `stage` is reserved and ignored, so
/// varying it with a fixed mode always yields the same set.
pub fn allowed_tools(
    stage: Option<ConversationStage>,
    mode: ConversationMode,
    catalog: &ToolCatalog,
) -> Vec<ToolDefinition> {
    let _ = stage;
    match mode {
        ConversationMode::Chat => catalog.subset(READ_ONLY_TOOLS.iter().copied()).definitions(),
        ConversationMode::Agent => catalog.definitions(),
    }
}
