//! Orchestration engine: events, timeouts, batch execution, policy.

pub mod coordinator;
pub mod events;
pub mod policy;
pub mod timeout;

pub use coordinator::execute_batch;
pub use events::{EventBus, ToolOutput, ToolResult, WorkspaceEvent};
pub use policy::{ConversationMode, ConversationStage, allowed_tools};
pub use timeout::TimeoutCenter;
