//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tarn_core::core::ConversationMode;

mod commands;

/// Marker error for a run that was cancelled by the user.
#[derive(Debug)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cancelled")
    }
}

impl std::error::Error for CancelledError {}

#[derive(Parser)]
#[command(name = "tarn")]
#[command(version)]
#[command(about = "Agent tool-orchestration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory for file operations (default: current directory)
    #[arg(long, default_value = ".")]
    root: String,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Executes one prompt against the agent
    Exec {
        /// The prompt to send to the agent
        #[arg(short, long)]
        prompt: String,

        /// Conversation mode (chat = read-only tools, agent = full catalog)
        #[arg(long, default_value = "agent")]
        mode: String,
    },

    /// Inspect archived conversation folds
    Folds {
        #[command(subcommand)]
        command: FoldCommands,
    },

    /// Manage patch-set checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum FoldCommands {
    /// Lists archived folds, oldest first
    List {
        /// Maximum number of folds to show (most recent)
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Prints a fold's archived content
    Show {
        /// The ID of the fold to show
        #[arg(value_name = "FOLD_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum CheckpointCommands {
    /// Lists saved checkpoints, oldest first
    List,
    /// Reverts the workspace to the state before a checkpoint
    Restore {
        /// The ID of the checkpoint to restore
        #[arg(value_name = "CHECKPOINT_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("TARN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let root = PathBuf::from(&cli.root);

    match cli.command {
        Commands::Exec { prompt, mode } => {
            let config = tarn_core::config::Config::load().context("load config")?;
            let mode = parse_mode(&mode)?;
            commands::exec::run(commands::exec::ExecOptions {
                root,
                prompt: &prompt,
                mode,
                config: &config,
            })
            .await
        }

        Commands::Folds { command } => match command {
            FoldCommands::List { limit } => commands::folds::list(&root, limit),
            FoldCommands::Show { id } => commands::folds::show(&root, &id),
        },

        Commands::Checkpoints { command } => match command {
            CheckpointCommands::List => commands::checkpoints::list(&root),
            CheckpointCommands::Restore { id } => commands::checkpoints::restore(&root, &id),
        },

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

fn parse_mode(s: &str) -> Result<ConversationMode> {
    match s.to_lowercase().as_str() {
        "chat" => Ok(ConversationMode::Chat),
        "agent" => Ok(ConversationMode::Agent),
        _ => anyhow::bail!("Invalid mode '{s}'. Valid options: chat, agent"),
    }
}
