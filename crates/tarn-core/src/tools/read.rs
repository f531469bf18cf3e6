//! Read file tool.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolFuture, resolve_existing_path};
use crate::core::events::ToolOutput;

/// Maximum lines returned when no explicit limit is given.
const DEFAULT_LINE_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct ReadInput {
    path: String,
    /// 1-based line to start from.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool;

impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace. Supports offset/limit for large files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file (relative to the workspace root)"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start reading from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default: 2000)"
                }
            },
            "required": ["path"],
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
    let input: ReadInput = match serde_json::from_value(input.clone()) {
        Ok(i) => i,
        Err(e) => {
            return ToolOutput::failure(
                "invalid_input",
                format!("Invalid input for read tool: {e}"),
                None,
            );
        }
    };

    let path = match resolve_existing_path(&input.path, &ctx.root) {
        Ok(p) => p,
        Err(output) => return output,
    };

    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            return ToolOutput::failure(
                "read_error",
                format!("Failed to read '{}'", path.display()),
                Some(format!("OS error: {e}")),
            );
        }
    };

    let total_lines = contents.lines().count();
    let start = input.offset.unwrap_or(1).max(1) - 1;
    let limit = input.limit.unwrap_or(DEFAULT_LINE_LIMIT);
    let selected: Vec<&str> = contents.lines().skip(start).take(limit).collect();
    let truncated = start + selected.len() < total_lines;

    ToolOutput::success(json!({
        "path": input.path,
        "content": selected.join("\n"),
        "total_lines": total_lines,
        "truncated": truncated,
    }))
}
