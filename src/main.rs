mod backup;
mod cli;
mod config;
mod database;
mod error;
mod history;
mod log;
mod notify;
#[cfg(test)]
mod testing;
mod upload;

use backup::{BackupOrchestrator, RunRequest};
use clap::{Parser, Subcommand};
use config::DumpFormat;
use error::{BackupError, Result};
use history::RunHistory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "pgbak", version, about = "Streaming PostgreSQL backups to Backblaze B2")]
struct Cli {
    /// Configuration file (defaults to ~/.pgbak/config.toml)
    #[arg(long, short, env = "PGBAK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Back up every server that is due
    Run {
        /// Only this server id
        #[arg(long)]
        server: Option<String>,
        /// Ignore backup frequency
        #[arg(long)]
        force: bool,
        /// plain or native (defaults to the config's default_format)
        #[arg(long)]
        format: Option<DumpFormat>,
    },
    /// Show configured servers and their last result
    List,
    /// Show the run log of one server
    Logs {
        server: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Validate the configuration and show how storage settings resolve per server
    Check,
}

#[tokio::main]
async fn main() {
    log::init();
    let args = Cli::parse();

    let code = match execute(args).await {
        Ok(code) => code,
        Err(BackupError::LockBusy(path)) => {
            error!("Process is already running (lock held at {})", path.display());
            2
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn execute(args: Cli) -> Result<i32> {
    let config_path = args.config.unwrap_or_else(config::config_path);
    let config = config::load(&config_path)?;

    match args.command {
        Commands::Run {
            server,
            force,
            format,
        } => {
            let request = RunRequest {
                server,
                force,
                format: format.unwrap_or(config.default_format),
            };
            let history = Arc::new(RunHistory::open(&config.history_path)?);
            let orchestrator = BackupOrchestrator::from_config(config, history)?;

            let summary = orchestrator.run(&request).await?;
            cli::print_summary(&summary);
            Ok(if summary.failed > 0 { 1 } else { 0 })
        }
        Commands::List => {
            let history = RunHistory::open(&config.history_path)?;
            cli::print_servers(&config, &history)?;
            Ok(0)
        }
        Commands::Logs { server, limit } => {
            if config.server(&server).is_none() {
                return Err(BackupError::Config(format!(
                    "no server with id '{}' is configured",
                    server
                )));
            }
            let history = RunHistory::open(&config.history_path)?;
            cli::print_logs(&server, &history.records_for(&server, limit)?);
            Ok(0)
        }
        Commands::Check => {
            info!("Configuration at {:?} is valid", config_path);
            Ok(if cli::print_check(&config) { 0 } else { 1 })
        }
    }
}
