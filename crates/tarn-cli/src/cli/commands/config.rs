//! Config command handlers.

use anyhow::{Context, Result};
use tarn_core::config::Config;

pub fn path() {
    println!("{}", Config::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = Config::config_path();
    Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}
