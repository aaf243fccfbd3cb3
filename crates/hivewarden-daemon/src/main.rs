//! Hivewarden daemon binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hivewarden_core::config::HiveConfig;
use hivewarden_daemon::Daemon;

/// Hivewarden - fleet security monitoring for remote hosts.
#[derive(Parser, Debug)]
#[command(name = "hivewarden", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "/etc/hivewarden/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<DaemonCommand>,
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    /// Run the daemon (link server, scheduler, scan pipelines).
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = HiveConfig::load(&args.config)?;

    // Priority: HIVEWARDEN_LOG env var > log_level in config.toml > info.
    let env_filter = EnvFilter::try_from_env("HIVEWARDEN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.clone().unwrap_or_else(|| "info".to_string()))
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match args.command.unwrap_or(DaemonCommand::Run) {
        DaemonCommand::Run => Daemon::new(config).run().await,
    }
}
