use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use replica_sync::ComparisonMethod;

mod config;
mod daemon;
mod scheduler;
mod telemetry;

use config::{DaemonConfig, Overrides, Settings};
use daemon::MirrorDaemon;

#[derive(Parser)]
#[command(name = "replicad")]
#[command(about = "Keep a replica directory in one-way sync with a source directory")]
#[command(version)]
struct Cli {
    /// Source directory to mirror from
    source: PathBuf,

    /// Replica directory to keep in sync
    replica: PathBuf,

    /// Seconds between the end of one cycle and the start of the next
    interval: u64,

    /// File receiving one INFO/ERROR line per outcome
    log_file: PathBuf,

    /// TOML settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level for console and diagnostic output
    #[arg(short, long)]
    log_level: Option<String>,

    /// How stale replica files are detected (size-mtime, blake3, sha256)
    #[arg(long)]
    compare: Option<ComparisonMethod>,

    /// Report what would change without touching the replica
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!();
            eprintln!("{}", Cli::command().render_usage());
            return Ok(ExitCode::from(1));
        }
    };

    let _guard = telemetry::init(&config.telemetry)?;
    let daemon = MirrorDaemon::new(config);
    info!(
        source = %daemon.config().source,
        replica = %daemon.config().replica,
        log_file = %daemon.config().log_file.display(),
        "Configuration loaded"
    );

    if cli.once {
        let report = daemon.run_once().await?;
        return Ok(if report.is_successful() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        });
    }

    daemon.run().await?;
    Ok(ExitCode::SUCCESS)
}

async fn load_config(cli: &Cli) -> Result<DaemonConfig> {
    let settings = match &cli.settings {
        Some(path) => Settings::load(path).await?,
        None => Settings::default(),
    };

    DaemonConfig::build(
        &cli.source,
        &cli.replica,
        cli.interval,
        cli.log_file.clone(),
        settings,
        Overrides {
            log_level: cli.log_level.clone(),
            comparison: cli.compare,
            dry_run: cli.dry_run,
        },
    )
}
