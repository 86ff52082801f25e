use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::board::ordering::IndexPolicy;
use taskboard::config::{BoardConfig, Overrides};
use taskboard::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Multi-tenant Kanban task board server")]
pub struct Cli {
    /// Directory holding `.taskboard/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the config file (default: .taskboard/taskboard.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter, e.g. "debug" or "taskboard=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Out-of-range move indices: reject or clamp
        #[arg(long)]
        index_policy: Option<IndexPolicy>,
    },
    /// Create the board database and run migrations
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Renumber every column so task orders are dense again
    Reindex {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Only repair this workspace
        #[arg(long)]
        workspace: Option<String>,
    },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Initialize a default taskboard.toml file
    Init,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            log_level: self.log_level.clone(),
            ..Default::default()
        };
        match &self.command {
            Commands::Serve {
                host,
                port,
                db_path,
                dev,
                index_policy,
            } => {
                overrides.host = host.clone();
                overrides.port = *port;
                overrides.db_path = db_path.clone();
                overrides.dev_mode = dev.then_some(true);
                overrides.index_policy = *index_policy;
            }
            Commands::Init { db_path } | Commands::Reindex { db_path, .. } => {
                overrides.db_path = db_path.clone();
            }
            Commands::Config { .. } => {}
        }
        overrides
    }
}

/// Resolve configuration and install logging for commands that touch the board.
fn setup(cli: &Cli, project_dir: &Path) -> Result<(BoardConfig, Option<WorkerGuard>)> {
    let config = BoardConfig::resolve(project_dir, cli.config.as_deref(), &cli.overrides())?
        .rooted_at(project_dir);
    let guard = logging::init(&config.logging)?;
    Ok((config, guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve { .. } => {
            let (config, _log_guard) = setup(&cli, &project_dir)?;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Init { .. } => {
            let (config, _log_guard) = setup(&cli, &project_dir)?;
            cmd::cmd_init(&config)?;
        }
        Commands::Reindex { workspace, .. } => {
            let (config, _log_guard) = setup(&cli, &project_dir)?;
            cmd::cmd_reindex(&config, workspace.as_deref())?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?;
        }
    }

    Ok(())
}
