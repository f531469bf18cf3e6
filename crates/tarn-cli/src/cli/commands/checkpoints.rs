//! Checkpoint command handlers.

use std::path::Path;

use anyhow::{Context, Result};
use tarn_core::patchset::CheckpointStore;

pub fn list(root: &Path) -> Result<()> {
    let store = CheckpointStore::for_root(root);
    let manifests = store.list().context("list checkpoints")?;
    if manifests.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }
    for manifest in manifests {
        println!(
            "{}  {}  {} entries",
            manifest.id,
            manifest.created_at.format("%Y-%m-%d %H:%M"),
            manifest.entries.len()
        );
    }
    Ok(())
}

pub fn restore(root: &Path, id: &str) -> Result<()> {
    let store = CheckpointStore::for_root(root);
    let manifest = store
        .load(id)
        .with_context(|| format!("load checkpoint '{id}'"))?;
    store
        .restore(&manifest, None)
        .with_context(|| format!("restore checkpoint '{id}'"))?;
    println!("Restored checkpoint {} ({} entries)", manifest.id, manifest.entries.len());
    Ok(())
}
