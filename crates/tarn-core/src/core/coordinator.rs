//! Parallel tool batch execution with order-preserving results.
//!
//! Calls are spawned concurrently on a `JoinSet`; tasks may finish in any
//! order but each result lands in the slot of its input position, so the
//! returned vector always matches the input length and order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::events::{ToolOutput, ToolResult};
use crate::tools::{
    ProgressSender, ProgressUpdate, Tool, ToolCall, ToolCatalog, ToolContext, unknown_tool_output,
};

/// Callback invoked with live progress lines as running tools emit them.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(ProgressUpdate) + Send);

/// Executes a batch of tool calls concurrently.
///
/// Returns exactly one `ToolResult` per input call, in input order. Nothing
/// escapes the batch: an unknown tool name, a decode failure inside the tool,
/// or a panicking task each become an error-flavored result for that call
/// only, and the rest of the batch completes normally.
///
/// Each call is registered with the context's timeout center (when present)
/// before its task spawns and cleared when the task completes. Progress
/// updates are forwarded to `on_progress` as they occur and also reset the
/// reporting call's countdown.
pub async fn execute_batch(
    calls: &[ToolCall],
    catalog: &ToolCatalog,
    ctx: &ToolContext,
    mut on_progress: Option<ProgressCallback<'_>>,
) -> Vec<ToolResult> {
    let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
    let mut join_set: JoinSet<(usize, String, ToolOutput)> = JoinSet::new();
    // Task id -> (slot, call id), to attribute panics to the right call.
    let mut task_slots: HashMap<tokio::task::Id, (usize, String)> = HashMap::new();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();

    let timeout_secs = ctx.timeout.map_or(0, |t| t.as_secs());

    for (i, call) in calls.iter().enumerate() {
        let Some(tool) = catalog.find(&call.name) else {
            results[i] = Some(ToolResult::from_output(
                call.id.clone(),
                &unknown_tool_output(&call.name, catalog),
            ));
            continue;
        };

        if let Some(center) = &ctx.center {
            center.begin(&call.id, &call.name, target_file(&call.arguments), timeout_secs);
        }

        let tool = Arc::clone(tool);
        let call = call.clone();
        let call_id = call.id.clone();
        let call_ctx = ctx.for_call(&call.id);
        let progress = ProgressSender::new(call.id.clone(), progress_tx.clone());

        let handle = join_set.spawn(async move {
            let output = run_one(&*tool, &call, &call_ctx, progress).await;
            (i, call.id, output)
        });
        task_slots.insert(handle.id(), (i, call_id));
    }

    let mut remaining = join_set.len();
    while remaining > 0 {
        tokio::select! {
            Some(update) = progress_rx.recv() => {
                if let Some(center) = &ctx.center {
                    center.mark_progress(&update.tool_call_id);
                }
                if let Some(cb) = on_progress.as_deref_mut() {
                    cb(update);
                }
            }
            task = join_set.join_next_with_id() => {
                let Some(task) = task else { break };
                remaining -= 1;
                match task {
                    Ok((task_id, (slot, call_id, output))) => {
                        task_slots.remove(&task_id);
                        if let Some(center) = &ctx.center {
                            center.finish(&call_id);
                        }
                        debug!(call_id, ok = output.is_ok(), "tool call finished");
                        results[slot] = Some(ToolResult::from_output(call_id, &output));
                    }
                    Err(join_error) => {
                        let Some((slot, call_id)) = task_slots.remove(&join_error.id()) else {
                            warn!(error = %join_error, "tool task failed with unknown id");
                            continue;
                        };
                        if let Some(center) = &ctx.center {
                            center.finish(&call_id);
                        }
                        warn!(call_id, error = %join_error, "tool task panicked");
                        results[slot] = Some(ToolResult::from_output(
                            call_id,
                            &ToolOutput::failure(
                                "internal_error",
                                "Tool execution panicked",
                                Some(join_error.to_string()),
                            ),
                        ));
                    }
                }
            }
        }
    }

    // Forward progress lines that were buffered when the last task finished.
    while let Ok(update) = progress_rx.try_recv() {
        if let Some(cb) = on_progress.as_deref_mut() {
            cb(update);
        }
    }

    results
        .into_iter()
        .zip(calls)
        .map(|(slot, call)| {
            slot.unwrap_or_else(|| {
                ToolResult::from_output(
                    call.id.clone(),
                    &ToolOutput::failure("internal_error", "Tool produced no result", None),
                )
            })
        })
        .collect()
}

async fn run_one(
    tool: &dyn Tool,
    call: &ToolCall,
    ctx: &ToolContext,
    progress: ProgressSender,
) -> ToolOutput {
    if ctx.is_cancelled() {
        return ToolOutput::canceled("Cancelled before start");
    }
    tool.execute_with_progress(&call.arguments, ctx, progress).await
}

/// Pulls the file a call targets out of its arguments, for display ticks.
fn target_file(arguments: &Value) -> Option<PathBuf> {
    arguments
        .get("path")
        .and_then(Value::as_str)
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::core::events::ToolOutput;
    use crate::core::timeout::TimeoutCenter;
    use crate::tools::ToolFuture;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn ctx(temp: &TempDir) -> ToolContext {
        ToolContext::new(temp.path().to_path_buf(), None)
    }

    struct PanicTool;

    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn execute(&self, _input: &Value, _ctx: &ToolContext) -> ToolFuture {
            Box::pin(async { panic!("boom") })
        }
    }

    struct ChattyTool;

    impl Tool for ChattyTool {
        fn name(&self) -> &str {
            "chatty"
        }
        fn description(&self) -> &str {
            "reports progress"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn execute(&self, _input: &Value, _ctx: &ToolContext) -> ToolFuture {
            Box::pin(async { ToolOutput::success(json!({})) })
        }
        fn execute_with_progress(
            &self,
            _input: &Value,
            _ctx: &ToolContext,
            progress: ProgressSender,
        ) -> ToolFuture {
            Box::pin(async move {
                progress.report("step one");
                progress.report("step two");
                ToolOutput::success(json!({"done": true}))
            })
        }
    }

    #[tokio::test]
    async fn test_results_match_input_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello\n").unwrap();
        let catalog = ToolCatalog::builtins();

        let calls = vec![
            call("c1", "bash", json!({"command": "sleep 0.2; echo first"})),
            call("c2", "teleport", json!({})),
            call("c3", "read", json!({"path": "a.txt"})),
        ];

        let results = execute_batch(&calls, &catalog, &ctx(&temp), None).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[1].tool_call_id, "c2");
        assert_eq!(results[2].tool_call_id, "c3");
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(!results[2].is_error);
        assert!(results[1].content.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = ToolCatalog::builtins();
        let results = execute_batch(&[], &catalog, &ctx(&temp), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_error_result() {
        let temp = TempDir::new().unwrap();
        let mut catalog = ToolCatalog::new();
        catalog.register(Arc::new(PanicTool));

        let calls = vec![
            call("c1", "panic", json!({})),
        ];
        let results = execute_batch(&calls, &catalog, &ctx(&temp), None).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("internal_error"));
    }

    #[tokio::test]
    async fn test_multiple_panics_keep_their_call_ids() {
        let temp = TempDir::new().unwrap();
        let mut catalog = ToolCatalog::builtins();
        catalog.register(Arc::new(PanicTool));

        let calls = vec![
            call("c1", "panic", json!({})),
            call("c2", "bash", json!({"command": "echo fine"})),
            call("c3", "panic", json!({})),
        ];
        let results = execute_batch(&calls, &catalog, &ctx(&temp), None).await;

        assert_eq!(results[0].tool_call_id, "c1");
        assert!(results[0].is_error);
        assert_eq!(results[1].tool_call_id, "c2");
        assert!(!results[1].is_error);
        assert_eq!(results[2].tool_call_id, "c3");
        assert!(results[2].is_error);
    }

    #[tokio::test]
    async fn test_panic_does_not_poison_siblings() {
        let temp = TempDir::new().unwrap();
        let mut catalog = ToolCatalog::builtins();
        catalog.register(Arc::new(PanicTool));

        let calls = vec![
            call("c1", "bash", json!({"command": "echo ok"})),
            call("c2", "panic", json!({})),
        ];
        let results = execute_batch(&calls, &catalog, &ctx(&temp), None).await;

        assert!(!results[0].is_error);
        assert!(results[1].is_error);
    }

    #[tokio::test]
    async fn test_progress_is_forwarded() {
        let temp = TempDir::new().unwrap();
        let mut catalog = ToolCatalog::new();
        catalog.register(Arc::new(ChattyTool));

        let seen = Mutex::new(Vec::new());
        let mut collect = |update: ProgressUpdate| {
            seen.lock().unwrap().push(update.message);
        };

        let calls = vec![call("c1", "chatty", json!({}))];
        let results = execute_batch(&calls, &catalog, &ctx(&temp), Some(&mut collect)).await;
        assert!(!results[0].is_error);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec!["step one".to_string(), "step two".to_string()]);
    }

    #[tokio::test]
    async fn test_center_records_cleared_after_batch() {
        let temp = TempDir::new().unwrap();
        let catalog = ToolCatalog::builtins();
        let center = Arc::new(TimeoutCenter::new());
        let ctx = ctx(&temp).with_center(Arc::clone(&center));

        let calls = vec![
            call("c1", "bash", json!({"command": "echo a"})),
            call("c2", "bash", json!({"command": "echo b"})),
        ];
        let results = execute_batch(&calls, &catalog, &ctx, None).await;

        assert_eq!(results.len(), 2);
        assert!(center.active_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_yields_canceled_output() {
        let temp = TempDir::new().unwrap();
        let catalog = ToolCatalog::builtins();
        let center = Arc::new(TimeoutCenter::new());
        center.begin("c1", "bash", None, 60);
        center.cancel("c1");

        let call_ctx = ctx(&temp).with_center(Arc::clone(&center)).for_call("c1");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let tool = Arc::clone(catalog.find("bash").unwrap());
        let output = run_one(
            &*tool,
            &call("c1", "bash", json!({"command": "echo never"})),
            &call_ctx,
            ProgressSender::new("c1", tx),
        )
        .await;

        assert!(matches!(output, ToolOutput::Canceled { .. }));
    }

    #[test]
    fn test_target_file_extraction() {
        assert_eq!(
            target_file(&json!({"path": "src/main.rs"})),
            Some(PathBuf::from("src/main.rs"))
        );
        assert_eq!(target_file(&json!({"command": "ls"})), None);
    }
}
