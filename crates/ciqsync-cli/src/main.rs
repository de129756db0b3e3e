mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ciqsync",
    version,
    about = "Incremental CIQ metrics sync with change detection, quality gating and alerting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync. Exit status: 0 success, 1 failure, 2 warning, 3 skip
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Window start (RFC 3339); overrides the stored cursor
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Detect and plan only; nothing downstream runs and no alert is sent
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate pipeline configuration and connectivity
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Inspect or advance the reference cursor
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },
    /// Show recent runs
    History {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Number of runs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the stored cursor
    Show {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Store a new cursor (RFC 3339)
    Set {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        reference_time: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            since,
            dry_run,
        } => commands::run::execute(&pipeline, since, dry_run).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
        Commands::Cursor { action } => match action {
            CursorAction::Show { pipeline } => commands::cursor::show(&pipeline),
            CursorAction::Set {
                pipeline,
                reference_time,
            } => commands::cursor::set(&pipeline, reference_time),
        },
        Commands::History { pipeline, limit } => commands::history::execute(&pipeline, limit),
    }
}
