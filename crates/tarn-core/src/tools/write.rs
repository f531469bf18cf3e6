//! Write file tool.
//!
//! Mutations go through the batch's patch-set builder, so every write is
//! captured in the checkpoint manifest.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolFuture};
use crate::core::events::ToolOutput;
use crate::patchset::FileChange;

#[derive(Debug, Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

pub struct WriteTool;

impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace with the given content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file (relative to the workspace root)"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn execute(&self, input: &Value, ctx: &ToolContext) -> ToolFuture {
        let input = input.clone();
        let ctx = ctx.clone();
        Box::pin(async move { run(&input, &ctx) })
    }
}

fn run(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: WriteInput = match serde_json::from_value(input.clone()) {
        Ok(i) => i,
        Err(e) => {
            return ToolOutput::failure(
                "invalid_input",
                format!("Invalid input for write tool: {e}"),
                None,
            );
        }
    };

    let existed = ctx.root.join(&input.path).exists();
    let bytes = input.content.len();
    match ctx.apply_change(&FileChange::write(&input.path, input.content)) {
        Ok(()) => ToolOutput::success(json!({
            "path": input.path,
            "bytes_written": bytes,
            "created": !existed,
        })),
        Err(e) => ToolOutput::failure(
            "write_error",
            format!("Failed to write '{}'", input.path),
            Some(e.to_string()),
        ),
    }
}
