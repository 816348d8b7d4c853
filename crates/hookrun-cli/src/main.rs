//! hookrun CLI.

use clap::{Parser, Subcommand};
use hookrun_core::{JobId, JobState};
use std::path::PathBuf;

mod commands;
mod logging;

use logging::LogLevel;

#[derive(Parser)]
#[command(name = "hookrun")]
#[command(about = "Durable job runner for repository event actions", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, env = "HOOKRUN_CONFIG", default_value = "hookrun.kdl", global = true)]
    config: PathBuf,

    /// Log level (overrides RUST_LOG)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,
    /// Queue an action for an event
    Enqueue {
        /// Action name
        action: String,
        /// Event JSON file
        #[arg(long)]
        event: PathBuf,
        /// Treat the file as a raw payload of this event kind
        #[arg(long)]
        kind: Option<String>,
    },
    /// Inspect and maintain queued jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Run one work directory quota check
    Cleanup,
    /// Validate the configuration file
    Validate,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List recent jobs
    List {
        /// Only show jobs in this state
        #[arg(long)]
        state: Option<JobState>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show job details
    Show {
        /// Job ID
        id: JobId,
    },
    /// Delete finished jobs older than the retention period
    Purge {
        /// Retention in days (defaults to queue.retention-days)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    match cli.command {
        Commands::Serve => {
            commands::serve::serve(&cli.config).await?;
        }
        Commands::Enqueue {
            action,
            event,
            kind,
        } => {
            commands::enqueue(&cli.config, &action, &event, kind).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::List { state, limit } => {
                commands::jobs::list(&cli.config, state, limit).await?;
            }
            JobCommands::Show { id } => {
                commands::jobs::show(&cli.config, id).await?;
            }
            JobCommands::Purge { days } => {
                commands::jobs::purge(&cli.config, days).await?;
            }
        },
        Commands::Cleanup => {
            commands::cleanup(&cli.config).await?;
        }
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
    }

    Ok(())
}
