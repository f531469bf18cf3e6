//! Patch-set / checkpoint subsystem.
//!
//! Groups the file-level side effects of one tool-call batch into an ordered,
//! persisted manifest and makes them reversible. Apply captures each file's
//! prior content before mutating; restore replays entries in reverse with
//! inverted change kinds. A failure mid-sequence leaves the already-applied
//! entries in the manifest, so a partial checkpoint still restores.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::core::events::{EventBus, WorkspaceEvent};

/// How a patch-set entry mutated its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File must not exist; inversion deletes it.
    Create,
    /// Create-or-overwrite; inversion rewrites the prior content.
    Write,
    /// File must exist; inversion rewrites the prior content.
    Replace,
    /// File must exist; inversion recreates it from the prior content.
    Delete,
}

/// A requested file mutation, before-content not yet captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Workspace-relative path.
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// New content; required for every kind except `Delete`.
    pub content: Option<String>,
}

impl FileChange {
    pub fn create(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Create,
            content: Some(content.into()),
        }
    }

    pub fn write(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Write,
            content: Some(content.into()),
        }
    }

    pub fn replace(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Replace,
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
            content: None,
        }
    }
}

/// One applied mutation. Entry order in the manifest is application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetEntry {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Content before the mutation. Populated for every kind except `Create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_content: Option<String>,
    /// Content after the mutation. Absent for `Delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_content: Option<String>,
}

/// Ordered record of one batch's file mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<PatchSetEntry>,
}

/// Errors from applying, restoring, or persisting patch sets.
#[derive(Debug)]
pub enum PatchError {
    Io { path: PathBuf, source: io::Error },
    AlreadyExists { path: PathBuf },
    NotFound { path: PathBuf },
    MissingContent { path: PathBuf },
    EscapesRoot { path: PathBuf },
    Corrupt { path: PathBuf, message: String },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::Io { path, source } => {
                write!(f, "I/O error at {}: {source}", path.display())
            }
            PatchError::AlreadyExists { path } => {
                write!(f, "File already exists: {}", path.display())
            }
            PatchError::NotFound { path } => write!(f, "Not found: {}", path.display()),
            PatchError::MissingContent { path } => {
                write!(f, "Change for {} requires content", path.display())
            }
            PatchError::EscapesRoot { path } => {
                write!(f, "Path escapes workspace root: {}", path.display())
            }
            PatchError::Corrupt { path, message } => {
                write!(f, "Corrupt manifest at {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PatchError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn io_err(path: &Path, source: io::Error) -> PatchError {
    PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Resolves a workspace-relative path, rejecting absolute paths outside the
/// root and any `..` traversal.
fn resolve_change_path(root: &Path, path: &Path) -> Result<PathBuf, PatchError> {
    let escapes = || PatchError::EscapesRoot {
        path: path.to_path_buf(),
    };

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(escapes());
    }
    if path.is_absolute() {
        if path.starts_with(root) {
            return Ok(path.to_path_buf());
        }
        return Err(escapes());
    }
    Ok(root.join(path))
}

/// Records and applies the mutations of one batch, in order.
#[derive(Debug)]
pub struct PatchSetBuilder {
    root: PathBuf,
    manifest: PatchSetManifest,
    bus: Option<EventBus>,
}

impl PatchSetBuilder {
    pub fn new(root: impl Into<PathBuf>, bus: Option<EventBus>) -> Self {
        Self {
            root: root.into(),
            manifest: PatchSetManifest {
                id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                entries: Vec::new(),
            },
            bus,
        }
    }

    /// Captures the file's prior content, performs the mutation, records the
    /// entry, and publishes a file event.
    ///
    /// A `Write` that lands on a missing file is recorded as `Create`, so
    /// every recorded `Write`/`Replace`/`Delete` entry carries before-content
    /// and stays invertible.
    ///
    /// # Errors
    /// Fails without recording an entry; entries already applied stay in the
    /// manifest.
    pub fn apply(&mut self, change: &FileChange) -> Result<(), PatchError> {
        let abs = resolve_change_path(&self.root, &change.path)?;
        let before = fs::read_to_string(&abs).ok();

        let require_content = || {
            change.content.clone().ok_or(PatchError::MissingContent {
                path: change.path.clone(),
            })
        };

        let recorded_kind = match change.kind {
            ChangeKind::Create => {
                if abs.exists() {
                    return Err(PatchError::AlreadyExists {
                        path: change.path.clone(),
                    });
                }
                let content = require_content()?;
                write_file(&abs, &content)?;
                ChangeKind::Create
            }
            ChangeKind::Write => {
                let content = require_content()?;
                write_file(&abs, &content)?;
                if before.is_some() {
                    ChangeKind::Write
                } else {
                    ChangeKind::Create
                }
            }
            ChangeKind::Replace => {
                if before.is_none() {
                    return Err(PatchError::NotFound {
                        path: change.path.clone(),
                    });
                }
                let content = require_content()?;
                write_file(&abs, &content)?;
                ChangeKind::Replace
            }
            ChangeKind::Delete => {
                if before.is_none() {
                    return Err(PatchError::NotFound {
                        path: change.path.clone(),
                    });
                }
                fs::remove_file(&abs).map_err(|e| io_err(&abs, e))?;
                ChangeKind::Delete
            }
        };

        self.publish_apply_event(recorded_kind, &change.path);
        self.manifest.entries.push(PatchSetEntry {
            path: change.path.clone(),
            kind: recorded_kind,
            before_content: before,
            after_content: change.content.clone(),
        });
        Ok(())
    }

    /// Applies changes in order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the failing index and error; earlier entries remain applied
    /// and recorded (partial checkpoint).
    pub fn apply_all(&mut self, changes: &[FileChange]) -> Result<(), (usize, PatchError)> {
        for (i, change) in changes.iter().enumerate() {
            self.apply(change).map_err(|e| (i, e))?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[PatchSetEntry] {
        &self.manifest.entries
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Consumes the builder and returns the manifest for persistence.
    pub fn finish(self) -> PatchSetManifest {
        self.manifest
    }

    fn publish_apply_event(&self, kind: ChangeKind, path: &Path) {
        let Some(bus) = &self.bus else { return };
        let event = match kind {
            ChangeKind::Create => WorkspaceEvent::FileCreated {
                path: path.to_path_buf(),
            },
            // The event contract has no delete notification; a removed file
            // surfaces as a modification of its path.
            ChangeKind::Write | ChangeKind::Replace | ChangeKind::Delete => {
                WorkspaceEvent::FileModified {
                    path: path.to_path_buf(),
                }
            }
        };
        bus.publish(event);
    }
}

fn write_file(abs: &Path, content: &str) -> Result<(), PatchError> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(abs, content).map_err(|e| io_err(abs, e))
}

/// Persists manifests as checkpoints and restores from them.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = Config::checkpoints_dir(&root);
        Self { root, dir }
    }

    /// Persists a manifest, one JSON file per applied batch.
    ///
    /// # Errors
    /// Returns an error when the manifest cannot be written.
    pub fn save(&self, manifest: &PatchSetManifest) -> Result<PathBuf, PatchError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let path = self.manifest_path(&manifest.id);
        let body = serde_json::to_string_pretty(manifest).map_err(|e| PatchError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, body).map_err(|e| io_err(&path, e))?;
        tracing::debug!(id = %manifest.id, entries = manifest.entries.len(), "checkpoint saved");
        Ok(path)
    }

    /// # Errors
    /// `NotFound` for unknown checkpoint ids.
    pub fn load(&self, id: &str) -> Result<PatchSetManifest, PatchError> {
        let path = self.manifest_path(id);
        let body = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PatchError::NotFound { path: path.clone() }
            } else {
                io_err(&path, e)
            }
        })?;
        serde_json::from_str(&body).map_err(|e| PatchError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    /// All checkpoints, oldest first.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be read; unreadable
    /// individual manifests are skipped.
    pub fn list(&self) -> Result<Vec<PatchSetManifest>, PatchError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .ok()
                .and_then(|body| serde_json::from_str::<PatchSetManifest>(&body).ok())
            {
                Some(manifest) => manifests.push(manifest),
                None => tracing::warn!(path = %path.display(), "skipping unreadable checkpoint"),
            }
        }
        manifests.sort_by_key(|m| m.created_at);
        Ok(manifests)
    }

    /// Replays a manifest's entries in reverse order, inverting each change.
    ///
    /// Write/Replace rewrite the before-content, Create deletes the file,
    /// Delete recreates it. Idempotent: restoring twice leaves the same file
    /// states as restoring once.
    ///
    /// # Errors
    /// Stops at the first entry whose inversion fails.
    pub fn restore(&self, manifest: &PatchSetManifest, bus: Option<&EventBus>) -> Result<(), PatchError> {
        for entry in manifest.entries.iter().rev() {
            let abs = resolve_change_path(&self.root, &entry.path)?;
            match entry.kind {
                ChangeKind::Create => match fs::remove_file(&abs) {
                    Ok(()) => {}
                    // Already gone: a prior restore removed it.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&abs, e)),
                },
                ChangeKind::Write | ChangeKind::Replace | ChangeKind::Delete => {
                    let before =
                        entry
                            .before_content
                            .as_ref()
                            .ok_or_else(|| PatchError::MissingContent {
                                path: entry.path.clone(),
                            })?;
                    write_file(&abs, before)?;
                }
            }
            if let Some(bus) = bus {
                bus.publish(WorkspaceEvent::FileModified {
                    path: entry.path.clone(),
                });
            }
        }
        tracing::debug!(id = %manifest.id, "checkpoint restored");
        Ok(())
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn read(root: &Path, rel: &str) -> Option<String> {
        fs::read_to_string(root.join(rel)).ok()
    }

    #[test]
    fn test_apply_records_entries_in_order() {
        let temp = TempDir::new().unwrap();
        let mut builder = PatchSetBuilder::new(temp.path(), None);

        builder
            .apply_all(&[
                FileChange::create("a.txt", "alpha"),
                FileChange::create("sub/b.txt", "beta"),
            ])
            .unwrap();

        let manifest = builder.finish();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[0].path, PathBuf::from("a.txt"));
        assert_eq!(manifest.entries[1].path, PathBuf::from("sub/b.txt"));
        assert_eq!(read(temp.path(), "a.txt").unwrap(), "alpha");
        assert_eq!(read(temp.path(), "sub/b.txt").unwrap(), "beta");
    }

    #[test]
    fn test_apply_captures_before_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "old").unwrap();

        let mut builder = PatchSetBuilder::new(temp.path(), None);
        builder.apply(&FileChange::replace("a.txt", "new")).unwrap();

        let entry = &builder.entries()[0];
        assert_eq!(entry.before_content.as_deref(), Some("old"));
        assert_eq!(entry.after_content.as_deref(), Some("new"));
        assert_eq!(read(temp.path(), "a.txt").unwrap(), "new");
    }

    #[test]
    fn test_write_to_missing_file_recorded_as_create() {
        let temp = TempDir::new().unwrap();
        let mut builder = PatchSetBuilder::new(temp.path(), None);

        builder.apply(&FileChange::write("a.txt", "x")).unwrap();
        assert_eq!(builder.entries()[0].kind, ChangeKind::Create);

        builder.apply(&FileChange::write("a.txt", "y")).unwrap();
        assert_eq!(builder.entries()[1].kind, ChangeKind::Write);
        assert_eq!(builder.entries()[1].before_content.as_deref(), Some("x"));
    }

    #[test]
    fn test_create_existing_file_fails_without_entry() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "here").unwrap();

        let mut builder = PatchSetBuilder::new(temp.path(), None);
        let err = builder.apply(&FileChange::create("a.txt", "x")).unwrap_err();
        assert!(matches!(err, PatchError::AlreadyExists { .. }));
        assert!(builder.is_empty());
        assert_eq!(read(temp.path(), "a.txt").unwrap(), "here");
    }

    #[test]
    fn test_partial_apply_keeps_applied_entries() {
        let temp = TempDir::new().unwrap();
        let mut builder = PatchSetBuilder::new(temp.path(), None);

        let result = builder.apply_all(&[
            FileChange::create("ok.txt", "fine"),
            FileChange::delete("missing.txt"),
            FileChange::create("never.txt", "unreached"),
        ]);

        let (failed_index, err) = result.unwrap_err();
        assert_eq!(failed_index, 1);
        assert!(matches!(err, PatchError::NotFound { .. }));
        // The partial manifest remains valid for restore.
        assert_eq!(builder.entries().len(), 1);
        assert!(read(temp.path(), "never.txt").is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let temp = TempDir::new().unwrap();
        let mut builder = PatchSetBuilder::new(temp.path(), None);

        let err = builder
            .apply(&FileChange::create("../outside.txt", "x"))
            .unwrap_err();
        assert!(matches!(err, PatchError::EscapesRoot { .. }));
    }

    #[test]
    fn test_restore_inverts_in_reverse_order() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("keep.txt"), "original").unwrap();
        fs::write(temp.path().join("gone.txt"), "deleted content").unwrap();

        let mut builder = PatchSetBuilder::new(temp.path(), None);
        builder
            .apply_all(&[
                FileChange::create("new.txt", "created"),
                FileChange::replace("keep.txt", "changed"),
                FileChange::delete("gone.txt"),
            ])
            .unwrap();
        let manifest = builder.finish();

        let store = CheckpointStore::for_root(temp.path());
        store.restore(&manifest, None).unwrap();

        assert!(read(temp.path(), "new.txt").is_none());
        assert_eq!(read(temp.path(), "keep.txt").unwrap(), "original");
        assert_eq!(read(temp.path(), "gone.txt").unwrap(), "deleted content");
    }

    #[test]
    fn test_restore_twice_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "v1").unwrap();

        let mut builder = PatchSetBuilder::new(temp.path(), None);
        builder
            .apply_all(&[
                FileChange::replace("a.txt", "v2"),
                FileChange::create("b.txt", "fresh"),
            ])
            .unwrap();
        let manifest = builder.finish();

        let store = CheckpointStore::for_root(temp.path());
        store.restore(&manifest, None).unwrap();
        let first = (read(temp.path(), "a.txt"), read(temp.path(), "b.txt"));

        store.restore(&manifest, None).unwrap();
        let second = (read(temp.path(), "a.txt"), read(temp.path(), "b.txt"));

        assert_eq!(first, second);
        assert_eq!(first.0.unwrap(), "v1");
        assert!(first.1.is_none());
    }

    #[test]
    fn test_save_load_roundtrip_and_list_order() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::for_root(temp.path());

        let mut first = PatchSetBuilder::new(temp.path(), None);
        first.apply(&FileChange::create("a.txt", "a")).unwrap();
        let first = first.finish();
        store.save(&first).unwrap();

        let mut second = PatchSetBuilder::new(temp.path(), None);
        second.apply(&FileChange::write("a.txt", "b")).unwrap();
        let mut second = second.finish();
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.save(&second).unwrap();

        assert_eq!(store.load(&first.id).unwrap(), first);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn test_load_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::for_root(temp.path());
        fs::create_dir_all(Config::checkpoints_dir(temp.path())).unwrap();

        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, PatchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_apply_publishes_file_events() {
        let temp = TempDir::new().unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        fs::write(temp.path().join("b.txt"), "old").unwrap();

        let mut builder = PatchSetBuilder::new(temp.path(), Some(bus));
        builder
            .apply_all(&[
                FileChange::create("a.txt", "x"),
                FileChange::replace("b.txt", "new"),
            ])
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            WorkspaceEvent::FileCreated {
                path: PathBuf::from("a.txt")
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkspaceEvent::FileModified {
                path: PathBuf::from("b.txt")
            }
        );
    }
}
