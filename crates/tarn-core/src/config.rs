//! Configuration management for tarn.
//!
//! Loads configuration from ${TARN_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Which backend answers model requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    /// Remote network service (default).
    #[default]
    Remote,
    /// Local on-device model server.
    Local,
}

/// Backend selection settings, re-read on every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Preferred provider.
    pub provider: ProviderChoice,
    /// When the local provider is configured but disabled, fall back to remote
    /// instead of failing loudly.
    pub allow_remote_fallback: bool,
}

/// Remote backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// API key; falls back to the `TARN_REMOTE_API_KEY` env var when unset.
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tarn.dev".to_string(),
            api_key: None,
            model: "tarn-large".to_string(),
        }
    }
}

/// Local on-device backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Whether the local model server is available at all.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
        }
    }
}

/// Static folding policy: when to fold and how much recent history to keep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldingThresholds {
    /// Fold once the history exceeds this many messages.
    pub max_message_count: usize,
    /// Fold once the history exceeds this many characters of content.
    pub max_content_characters: usize,
    /// Newest messages always kept verbatim.
    pub preserve_most_recent_messages: usize,
}

impl Default for FoldingThresholds {
    fn default() -> Self {
        Self {
            max_message_count: 50,
            max_content_characters: 200_000,
            preserve_most_recent_messages: 10,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "provider")]
    pub providers: ProviderSettings,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub folding: FoldingThresholds,
    /// Per-tool-call timeout in seconds; 0 disables.
    pub tool_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: ProviderSettings::default(),
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
            folding: FoldingThresholds::default(),
            tool_timeout_seconds: 120,
        }
    }
}

impl Config {
    /// Returns the tarn home directory (${TARN_HOME} or ~/.tarn).
    pub fn tarn_home() -> PathBuf {
        if let Ok(home) = std::env::var("TARN_HOME") {
            let trimmed = home.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".tarn")
    }

    /// Returns the path to the config file.
    pub fn config_path() -> PathBuf {
        Self::tarn_home().join("config.toml")
    }

    /// Returns the per-workspace fold directory.
    pub fn folds_dir(root: &Path) -> PathBuf {
        root.join(".tarn").join("folds")
    }

    /// Returns the per-workspace checkpoint directory.
    pub fn checkpoints_dir(root: &Path) -> PathBuf {
        root.join(".tarn").join("checkpoints")
    }

    /// Loads config from the default location, using defaults if missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads config from an explicit path, using defaults if missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        validate_url(&config.remote.base_url, "remote")?;
        validate_url(&config.local.base_url, "local")?;
        Ok(config)
    }

    /// Returns the effective tool timeout, or `None` when disabled.
    pub fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tool_timeout_seconds))
        }
    }

    /// Generates a commented default config file body.
    pub fn generate() -> String {
        let defaults = Self::default();
        format!(
            r#"# tarn configuration

# Per-tool-call timeout in seconds (0 disables).
tool_timeout_seconds = {timeout}

[provider]
# Which backend answers requests: "remote" or "local".
provider = "remote"
# When the local provider is disabled, fall back to remote instead of failing.
allow_remote_fallback = false

[remote]
base_url = "{remote_url}"
model = "{remote_model}"
# api_key = "..."   # or set TARN_REMOTE_API_KEY

[local]
enabled = false
base_url = "{local_url}"
model = "{local_model}"

[folding]
max_message_count = {max_msgs}
max_content_characters = {max_chars}
preserve_most_recent_messages = {preserve}
"#,
            timeout = defaults.tool_timeout_seconds,
            remote_url = defaults.remote.base_url,
            remote_model = defaults.remote.model,
            local_url = defaults.local.base_url,
            local_model = defaults.local.model,
            max_msgs = defaults.folding.max_message_count,
            max_chars = defaults.folding.max_content_characters,
            preserve = defaults.folding.preserve_most_recent_messages,
        )
    }

    /// Writes a default config file at the given path.
    ///
    /// # Errors
    /// Fails if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, Self::generate())
            .with_context(|| format!("Failed to write config at {}", path.display()))
    }
}

fn validate_url(url: &str, section: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid [{section}] base URL: {url}"))?;
    Ok(())
}

/// Resolves an API key with precedence: config > env.
///
/// # Errors
/// Fails when neither the config value nor the env var is set.
pub fn resolve_api_key(config_api_key: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = config_api_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    std::env::var(env_var).with_context(|| {
        format!("No API key available. Set {env_var} or api_key in the [remote] section.")
    })
}
