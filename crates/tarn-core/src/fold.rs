//! Fold store: durable summarize-and-archive for conversation history.
//!
//! A fold replaces an older span of conversation with a compact summary plus
//! a recoverable pointer to the full content. The index is an append-only,
//! oldest-first JSON array; content lives beside it in one plain-text file
//! per entry, named by id and written once.
//!
//! One store instance owns one workspace root. The index read-modify-write
//! is serialized through the store's mutex; concurrent stores on the same
//! root are unsupported.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, FoldingThresholds};
use crate::providers::ChatMessage;

/// One folded span: summary in the index, full content under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldIndexEntry {
    pub id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Errors from fold persistence.
#[derive(Debug)]
pub enum FoldError {
    /// Unknown id, or the index/content file is missing.
    NotFound { id: String },
    Io { path: PathBuf, source: io::Error },
    Corrupt { path: PathBuf, message: String },
}

impl fmt::Display for FoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoldError::NotFound { id } => write!(f, "No fold with id {id}"),
            FoldError::Io { path, source } => {
                write!(f, "I/O error at {}: {source}", path.display())
            }
            FoldError::Corrupt { path, message } => {
                write!(f, "Corrupt fold index at {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for FoldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FoldError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Durable fold storage scoped to one workspace root.
#[derive(Debug)]
pub struct FoldStore {
    dir: PathBuf,
    index_path: PathBuf,
    /// Serializes index read-modify-write (single-writer discipline).
    write_lock: Mutex<()>,
}

impl FoldStore {
    pub fn for_root(root: &Path) -> Self {
        let dir = Config::folds_dir(root);
        let index_path = dir.join("index.json");
        Self {
            dir,
            index_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Persists full content under a fresh id and appends an index entry.
    ///
    /// # Errors
    /// Returns an error when the content or index cannot be written; a failed
    /// write never removes or reorders existing entries.
    pub fn write(&self, summary: &str, content: &str) -> Result<FoldIndexEntry, FoldError> {
        let _guard = self.lock();

        fs::create_dir_all(&self.dir).map_err(|e| self.io(&self.dir, e))?;

        let entry = FoldIndexEntry {
            id: Uuid::new_v4().to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
        };

        // Content first: an index entry must never point at a missing file.
        let content_path = self.content_path(&entry.id);
        fs::write(&content_path, content).map_err(|e| self.io(&content_path, e))?;

        let mut index = self.read_index()?;
        index.push(entry.clone());
        let body = serde_json::to_string_pretty(&index).map_err(|e| FoldError::Corrupt {
            path: self.index_path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&self.index_path, body).map_err(|e| self.io(&self.index_path, e))?;

        tracing::debug!(id = %entry.id, chars = content.len(), "fold written");
        Ok(entry)
    }

    /// Exact byte-for-byte recall of a fold's full content.
    ///
    /// # Errors
    /// `NotFound` when the id is unknown or its content file is missing.
    pub fn read(&self, id: &str) -> Result<String, FoldError> {
        let path = self.content_path(id);
        fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                FoldError::NotFound { id: id.to_string() }
            } else {
                self.io(&path, e)
            }
        })
    }

    /// The most recent `limit` index entries, still oldest-first.
    ///
    /// # Errors
    /// Returns an error when the index cannot be read.
    pub fn list(&self, limit: usize) -> Result<Vec<FoldIndexEntry>, FoldError> {
        let index = self.read_index()?;
        let skip = index.len().saturating_sub(limit);
        Ok(index.into_iter().skip(skip).collect())
    }

    fn read_index(&self) -> Result<Vec<FoldIndexEntry>, FoldError> {
        let body = match fs::read_to_string(&self.index_path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io(&self.index_path, e)),
        };
        serde_json::from_str(&body).map_err(|e| FoldError::Corrupt {
            path: self.index_path.clone(),
            message: e.to_string(),
        })
    }

    fn content_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.txt"))
    }

    fn io(&self, path: &Path, source: io::Error) -> FoldError {
        FoldError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Which prefix of the history to fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldPlan {
    /// Number of oldest messages to fold away.
    pub fold_count: usize,
}

/// Decides whether the history needs folding.
///
/// Folds when the message count or the total content size exceeds its
/// threshold, always keeping the `preserve_most_recent_messages` newest
/// messages verbatim. Returns `None` when no folding is needed or nothing
/// would be left to fold.
pub fn plan_fold(messages: &[ChatMessage], thresholds: &FoldingThresholds) -> Option<FoldPlan> {
    let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
    let over_count = messages.len() > thresholds.max_message_count;
    let over_chars = total_chars > thresholds.max_content_characters;
    if !over_count && !over_chars {
        return None;
    }

    let fold_count = messages
        .len()
        .saturating_sub(thresholds.preserve_most_recent_messages);
    if fold_count == 0 {
        return None;
    }
    Some(FoldPlan { fold_count })
}

/// Renders the folded prefix as the plain-text content archived in the store.
pub fn render_fold_content(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&format!("[{}]\n{}\n\n", message.role, message.content));
    }
    out
}
