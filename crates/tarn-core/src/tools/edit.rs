//! Edit file tool: exact string replacement.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolFuture, resolve_existing_path};
use crate::core::events::ToolOutput;
use crate::patchset::FileChange;

#[derive(Debug, Deserialize)]
struct EditInput {
    path: String,
    old: String,
    new: String,
    #[serde(default = "default_expected_replacements")]
    expected_replacements: usize,
}

fn default_expected_replacements() -> usize {
    1
}

pub struct EditTool;

impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit an existing file by performing an exact string replacement. \
         The 'old' text must match exactly, including whitespace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit (relative to the workspace root)"
                },
                "old": {
                    "type": "string",
                    "description": "Exact text to find and replace"
                },
                "new": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "expected_replacements": {
                    "type": "integer",
                    "description": "Expected number of replacements (default: 1)",
                    "default": 1
                }
            },
            "required": ["path", "old", "new"],
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
    let input: EditInput = match serde_json::from_value(input.clone()) {
        Ok(i) => i,
        Err(e) => {
            return ToolOutput::failure(
                "invalid_input",
                format!("Invalid input for edit tool: {e}"),
                None,
            );
        }
    };

    if input.old == input.new {
        return ToolOutput::failure("invalid_input", "'old' and 'new' are identical", None);
    }

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

    let occurrences = contents.matches(&input.old).count();
    if occurrences == 0 {
        return ToolOutput::failure(
            "no_match",
            format!("'old' text not found in '{}'", input.path),
            None,
        );
    }
    if occurrences != input.expected_replacements {
        return ToolOutput::failure(
            "match_count",
            format!(
                "Found {occurrences} occurrences, expected {}",
                input.expected_replacements
            ),
            Some("Pass expected_replacements or make 'old' more specific".to_string()),
        );
    }

    let updated = contents.replace(&input.old, &input.new);
    match ctx.apply_change(&FileChange::replace(&input.path, updated)) {
        Ok(()) => ToolOutput::success(json!({
            "path": input.path,
            "replacements": occurrences,
        })),
        Err(e) => ToolOutput::failure(
            "write_error",
            format!("Failed to write '{}'", input.path),
            Some(e.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::patchset::PatchSetBuilder;

    fn ctx(temp: &TempDir) -> ToolContext {
        ToolContext::new(temp.path().to_path_buf(), None)
    }

    #[tokio::test]
    async fn test_edit_replaces_unique_match() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "hello world").unwrap();

        let output = EditTool
            .execute(
                &json!({"path": "a.txt", "old": "world", "new": "tarn"}),
                &ctx(&temp),
            )
            .await;

        assert!(output.is_ok());
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "hello tarn"
        );
    }

    #[tokio::test]
    async fn test_edit_rejects_ambiguous_match() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "aaa aaa").unwrap();

        let output = EditTool
            .execute(
                &json!({"path": "a.txt", "old": "aaa", "new": "b"}),
                &ctx(&temp),
            )
            .await;

        let (code, _, _) = output.error_info().unwrap();
        assert_eq!(code, "match_count");
    }

    #[tokio::test]
    async fn test_edit_expected_replacements() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "x x x").unwrap();

        let output = EditTool
            .execute(
                &json!({"path": "a.txt", "old": "x", "new": "y", "expected_replacements": 3}),
                &ctx(&temp),
            )
            .await;

        assert!(output.is_ok());
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "y y y"
        );
    }

    #[tokio::test]
    async fn test_edit_no_match() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "content").unwrap();

        let output = EditTool
            .execute(
                &json!({"path": "a.txt", "old": "absent", "new": "x"}),
                &ctx(&temp),
            )
            .await;

        let (code, _, _) = output.error_info().unwrap();
        assert_eq!(code, "no_match");
    }

    #[tokio::test]
    async fn test_edit_records_before_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "v1").unwrap();
        let patches = Arc::new(Mutex::new(PatchSetBuilder::new(temp.path(), None)));
        let ctx = ToolContext::new(temp.path().to_path_buf(), None)
            .with_patches(Arc::clone(&patches));

        let output = EditTool
            .execute(&json!({"path": "a.txt", "old": "v1", "new": "v2"}), &ctx)
            .await;
        assert!(output.is_ok());

        let builder = patches.lock().unwrap();
        assert_eq!(builder.entries()[0].before_content.as_deref(), Some("v1"));
    }
}
