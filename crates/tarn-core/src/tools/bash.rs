//! Bash tool for executing shell commands.
//!
//! The only builtin wrapping an external process, and the only one that
//! observes cooperative cancellation: while waiting on the child it polls the
//! cancel flag and kills its own process group member when asked to stop.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProgressSender, Tool, ToolContext, ToolFuture};
use crate::core::events::ToolOutput;

/// Maximum bytes per output stream (stdout/stderr) before truncation.
const MAX_OUTPUT_BYTES: usize = 40 * 1024;

/// How often the wait loop checks cancellation and reports liveness.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct BashInput {
    command: String,
}

pub struct BashTool;

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace root. Returns stdout, stderr, and exit code."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn execute(&self, input: &Value, ctx: &ToolContext) -> ToolFuture {
        let input = input.clone();
        let ctx = ctx.clone();
        Box::pin(async move { run(&input, &ctx, None).await })
    }

    fn execute_with_progress(
        &self,
        input: &Value,
        ctx: &ToolContext,
        progress: ProgressSender,
    ) -> ToolFuture {
        let input = input.clone();
        let ctx = ctx.clone();
        Box::pin(async move { run(&input, &ctx, Some(progress)).await })
    }
}

async fn run(input: &Value, ctx: &ToolContext, progress: Option<ProgressSender>) -> ToolOutput {
    let input: BashInput = match serde_json::from_value(input.clone()) {
        Ok(i) => i,
        Err(e) => {
            return ToolOutput::failure(
                "invalid_input",
                format!("Invalid input for bash tool: {e}"),
                None,
            );
        }
    };
    if input.command.trim().is_empty() {
        return ToolOutput::failure("invalid_input", "command cannot be empty", None);
    }

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&input.command)
        .current_dir(&ctx.root)
        // Non-interactive dumb terminal: suppresses colors and progress bars.
        .env("TERM", "dumb")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            return ToolOutput::failure(
                "spawn_error",
                format!("Failed to execute command '{}'", input.command),
                Some(format!("Error: {e}")),
            );
        }
    };

    if let Some(progress) = &progress {
        progress.report(format!("running: {}", input.command));
    }

    let mut wait = std::pin::pin!(child.wait_with_output());
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let deadline = ctx.timeout.map(|t| tokio::time::Instant::now() + t);
    let started = tokio::time::Instant::now();

    let output = loop {
        tokio::select! {
            result = &mut wait => break result,
            _ = ticker.tick() => {
                // Dropping the wait future kills the child (kill_on_drop).
                if ctx.is_cancelled() {
                    return ToolOutput::canceled("Command cancelled");
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    let secs = ctx.timeout.unwrap_or_default().as_secs();
                    return ToolOutput::success(json!({
                        "stdout": "",
                        "stderr": format!("Command timed out after {secs} seconds"),
                        "exit_code": -1,
                        "timed_out": true,
                    }));
                }
                if let Some(progress) = &progress {
                    progress.report(format!(
                        "still running ({}s)",
                        started.elapsed().as_secs()
                    ));
                }
            }
        }
    };

    let output = match output {
        Ok(o) => o,
        Err(e) => {
            return ToolOutput::failure(
                "exec_error",
                format!("Failed to execute command '{}'", input.command),
                Some(format!("Error: {e}")),
            );
        }
    };

    let (stdout, stdout_truncated) = truncate_output(&output.stdout, MAX_OUTPUT_BYTES);
    let (stderr, stderr_truncated) = truncate_output(&output.stderr, MAX_OUTPUT_BYTES);

    ToolOutput::success(json!({
        "stdout": stdout,
        "stderr": stderr,
        "exit_code": output.status.code().unwrap_or(-1),
        "timed_out": false,
        "stdout_truncated": stdout_truncated,
        "stderr_truncated": stderr_truncated,
    }))
}

/// Lossy-decodes and truncates at a char boundary.
fn truncate_output(bytes: &[u8], max_bytes: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return (text.into_owned(), false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}
