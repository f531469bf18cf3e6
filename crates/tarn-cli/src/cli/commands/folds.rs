//! Fold command handlers.

use std::path::Path;

use anyhow::{Context, Result};
use tarn_core::fold::FoldStore;

pub fn list(root: &Path, limit: usize) -> Result<()> {
    let store = FoldStore::for_root(root);
    let entries = store.list(limit).context("list folds")?;
    if entries.is_empty() {
        println!("No folds found.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.summary
        );
    }
    Ok(())
}

pub fn show(root: &Path, id: &str) -> Result<()> {
    let store = FoldStore::for_root(root);
    let content = store.read(id).with_context(|| format!("read fold '{id}'"))?;
    print!("{content}");
    Ok(())
}
