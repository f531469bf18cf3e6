//! Tool system: the contract tools implement and the ordered catalog the
//! coordinator executes against.
//!
//! Arguments arrive as a generic JSON object and every tool decodes them into
//! its own input struct before doing anything; malformed input becomes an
//! `invalid_input` failure, never an execution.

pub mod bash;
pub mod edit;
pub mod read;
pub mod write;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::events::ToolOutput;
use crate::core::timeout::TimeoutCenter;
use crate::patchset::{FileChange, PatchError, PatchSetBuilder};

/// A uniquely identified invocation request from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON object of named arguments; immutable once issued.
    pub arguments: Value,
}

/// Serializable tool description sent to backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter spec.
    pub parameters: Value,
}

/// Live progress line from a running tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub tool_call_id: String,
    pub message: String,
}

/// Handle a tool uses to report human-readable status during long runs.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    call_id: String,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSender {
    pub fn new(call_id: impl Into<String>, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            call_id: call_id.into(),
            tx,
        }
    }

    pub fn report(&self, message: impl Into<String>) {
        let _ = self.tx.send(ProgressUpdate {
            tool_call_id: self.call_id.clone(),
            message: message.into(),
        });
    }
}

/// Context shared by every tool in a batch; the coordinator clones it per
/// call and fills in the call id.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Root directory for file operations.
    pub root: PathBuf,
    /// Optional per-call timeout.
    pub timeout: Option<Duration>,
    /// Id of the call this context belongs to.
    pub call_id: Option<String>,
    /// Timeout center owning this batch's records.
    pub center: Option<Arc<TimeoutCenter>>,
    /// Patch-set builder recording this batch's file mutations.
    pub patches: Option<Arc<Mutex<PatchSetBuilder>>>,
}

impl ToolContext {
    pub fn new(root: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            root,
            timeout,
            call_id: None,
            center: None,
            patches: None,
        }
    }

    #[must_use]
    pub fn with_center(mut self, center: Arc<TimeoutCenter>) -> Self {
        self.center = Some(center);
        self
    }

    #[must_use]
    pub fn with_patches(mut self, patches: Arc<Mutex<PatchSetBuilder>>) -> Self {
        self.patches = Some(patches);
        self
    }

    #[must_use]
    pub fn for_call(&self, call_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.call_id = Some(call_id.to_string());
        ctx
    }

    /// True once this call has been asked to stop. Cooperative: tools decide
    /// when to check.
    pub fn is_cancelled(&self) -> bool {
        match (&self.center, &self.call_id) {
            (Some(center), Some(call_id)) => center.is_cancelled(call_id),
            _ => false,
        }
    }

    /// Routes a file mutation through the batch's patch-set builder so it is
    /// checkpointed; without a builder the change is applied unrecorded.
    ///
    /// # Errors
    /// Propagates validation and I/O errors from the patch subsystem.
    pub fn apply_change(&self, change: &FileChange) -> Result<(), PatchError> {
        match &self.patches {
            Some(patches) => {
                let mut builder = patches
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                builder.apply(change)
            }
            None => PatchSetBuilder::new(self.root.clone(), None).apply(change),
        }
    }
}

/// Async tool output future.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutput> + Send>>;

/// The contract every tool implements.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema-shaped parameter spec.
    fn parameters(&self) -> Value;
    fn execute(&self, input: &Value, ctx: &ToolContext) -> ToolFuture;

    /// Progress-reporting variant; tools without incremental status fall back
    /// to plain `execute`.
    fn execute_with_progress(
        &self,
        input: &Value,
        ctx: &ToolContext,
        progress: ProgressSender,
    ) -> ToolFuture {
        let _ = progress;
        self.execute(input, ctx)
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Ordered catalog of available tools.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Catalog with the builtin workspace tools, in their canonical order.
    pub fn builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(read::ReadTool));
        catalog.register(Arc::new(write::WriteTool));
        catalog.register(Arc::new(edit::EditTool));
        catalog.register(Arc::new(bash::BashTool));
        catalog
    }

    /// Registers a tool, replacing any same-named tool in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self
            .tools
            .iter()
            .position(|t| t.name().eq_ignore_ascii_case(tool.name()))
        {
            Some(pos) => self.tools[pos] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Case-insensitive lookup, resilient to backend casing differences.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Sub-catalog containing only the named tools, original order kept.
    pub fn subset<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: Vec<String> = names.into_iter().map(str::to_ascii_lowercase).collect();
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| keep.contains(&t.name().to_ascii_lowercase()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }
}

/// Error output for a call naming a tool outside the catalog.
pub fn unknown_tool_output(name: &str, catalog: &ToolCatalog) -> ToolOutput {
    let mut available = catalog.names();
    available.sort();
    ToolOutput::failure(
        "unknown_tool",
        format!("Unknown tool: {name}"),
        Some(format!("Available tools: {}", available.join(", "))),
    )
}

/// Resolves a path for reading/editing an existing file under the root.
///
/// # Errors
/// Returns a `path_error` failure when the file does not exist.
pub(crate) fn resolve_existing_path(path: &str, root: &Path) -> Result<PathBuf, ToolOutput> {
    let requested = Path::new(path);
    let full_path = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    full_path.canonicalize().map_err(|e| {
        ToolOutput::failure(
            "path_error",
            format!("Path does not exist '{}'", full_path.display()),
            Some(format!("OS error: {e}")),
        )
    })
}
