//! Exec command handler: one prompt, run to completion.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tarn_core::config::Config;
use tarn_core::core::events::{EventBus, ToolOutput};
use tarn_core::core::{ConversationMode, TimeoutCenter, allowed_tools, execute_batch};
use tarn_core::fold::{FoldStore, plan_fold, render_fold_content};
use tarn_core::patchset::{CheckpointStore, PatchSetBuilder};
use tarn_core::providers::{BackendRequest, ChatMessage, Router, StreamChunk};
use tarn_core::tools::{ProgressUpdate, ToolCatalog, ToolContext};

use crate::cli::CancelledError;

/// Upper bound on model round-trips for a single exec run.
const MAX_TURNS: usize = 25;

pub struct ExecOptions<'a> {
    pub root: PathBuf,
    pub prompt: &'a str,
    pub mode: ConversationMode,
    pub config: &'a Config,
}

pub async fn run(options: ExecOptions<'_>) -> Result<()> {
    let ExecOptions {
        root,
        prompt,
        mode,
        config,
    } = options;

    let catalog = ToolCatalog::builtins();
    let bus = EventBus::new();
    let center = Arc::new(TimeoutCenter::with_bus(bus.clone()));
    {
        let center = Arc::clone(&center);
        ctrlc::set_handler(move || center.cancel_active_now()).context("set Ctrl+C handler")?;
    }

    let router = Router::new(config);
    let mut messages = vec![ChatMessage::user(prompt)];
    let mut cancelled = false;

    for _ in 0..MAX_TURNS {
        let request = BackendRequest {
            messages: messages.clone(),
            context: None,
            tools: allowed_tools(None, mode, &catalog),
            mode: Some(mode),
            root: Some(root.clone()),
        };

        let mut sink = |chunk: StreamChunk| {
            if !chunk.delta.is_empty() {
                print!("{}", chunk.delta);
                let _ = std::io::stdout().flush();
            }
        };
        let response = router
            .send_message_stream(&request, &mut sink)
            .await
            .context("model request")?;
        println!();

        if response.tool_calls.is_empty() {
            break;
        }
        messages.push(ChatMessage::assistant(response.text));

        let patches = Arc::new(Mutex::new(PatchSetBuilder::new(
            root.clone(),
            Some(bus.clone()),
        )));
        let ctx = ToolContext::new(root.clone(), config.tool_timeout())
            .with_center(Arc::clone(&center))
            .with_patches(Arc::clone(&patches));

        let mut on_progress = |update: ProgressUpdate| {
            eprintln!("  [{}] {}", update.tool_call_id, update.message);
        };
        let ticker = spawn_countdown_ticker(Arc::clone(&center));
        let results = execute_batch(&response.tool_calls, &catalog, &ctx, Some(&mut on_progress))
            .await;
        ticker.abort();
        drop(ctx);

        let builder = Arc::try_unwrap(patches)
            .map_err(|_| anyhow::anyhow!("patch builder still shared after batch"))?
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let manifest = builder.finish();
        if !manifest.entries.is_empty() {
            let store = CheckpointStore::for_root(&root);
            store.save(&manifest).context("save checkpoint")?;
            tracing::info!(id = %manifest.id, entries = manifest.entries.len(), "saved checkpoint");
        }

        for result in &results {
            if matches!(
                ToolOutput::from_json_str(&result.content),
                Ok(ToolOutput::Canceled { .. })
            ) {
                cancelled = true;
            }
            messages.push(ChatMessage {
                role: "tool".to_string(),
                content: result.content.clone(),
            });
        }
        if cancelled {
            break;
        }
    }

    if let Some(plan) = plan_fold(&messages, &config.folding) {
        let store = FoldStore::for_root(&root);
        let folded = &messages[..plan.fold_count];
        let summary = format!(
            "{} messages through {}",
            plan.fold_count,
            chrono::Utc::now().format("%Y-%m-%d %H:%M")
        );
        match store.write(&summary, &render_fold_content(folded)) {
            Ok(entry) => {
                tracing::info!(id = %entry.id, count = plan.fold_count, "folded history");
            }
            // Folding is best-effort; a failed archive never fails the run.
            Err(e) => tracing::warn!(error = %e, "skipping history fold"),
        }
    }

    if cancelled {
        return Err(CancelledError.into());
    }
    Ok(())
}

/// Prints a once-a-second countdown for in-flight tool calls to stderr.
/// Paused calls and calls without a deadline report no remaining time and
/// are skipped. Aborted by the caller once the batch settles.
fn spawn_countdown_ticker(center: Arc<TimeoutCenter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            for call_id in center.active_calls() {
                if let Some(remaining) = center.remaining_seconds(&call_id) {
                    eprintln!("  [{call_id}] {remaining}s remaining");
                }
            }
        }
    })
}
