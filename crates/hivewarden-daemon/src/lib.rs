//! Hivewarden daemon orchestration logic.
//!
//! The [`Daemon`] struct ties together the agent link server, the command
//! correlation sweep, the scheduler, and the scan report router into a
//! single async process.

pub mod dispatcher;
pub mod router;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use hivewarden_core::config::HiveConfig;
use hivewarden_core::store::{CommandAudit, ScanStore, SqliteStore};
use hivewarden_fleet::{run_link_server, Fleet};
use hivewarden_netwatch::ScorerClient;
use hivewarden_scheduler::Scheduler;
use hivewarden_vuln::CveCorpus;

use crate::dispatcher::FleetDispatcher;
use crate::router::{run_report_router, RouterContext};

/// Queue depth between the link readers and the report router.
const REPORT_BUFFER: usize = 256;

/// How often the correlator checks for expired commands.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

pub struct Daemon {
    config: HiveConfig,
}

impl Daemon {
    pub fn new(config: HiveConfig) -> Self {
        Self { config }
    }

    /// Run until SIGTERM/SIGINT or a fatal link-server error.
    pub async fn run(self) -> Result<()> {
        let pid_path = pid_file_path(&self.config);
        write_pid_file(&pid_path)?;

        // --- Stores ---
        if let Some(parent) = self.config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory: {}", parent.display()))?;
        }
        let store = Arc::new(
            SqliteStore::open(&self.config.db_path).context("opening server store")?,
        );
        let corpus = Arc::new(
            CveCorpus::open(&self.config.cve_db_path).context("opening CVE corpus")?,
        );

        // --- Fleet runtime ---
        let audit: Arc<dyn CommandAudit> = Arc::clone(&store) as Arc<dyn CommandAudit>;
        let fleet = Arc::new(Fleet::new(self.config.command_timeout()).with_audit(audit));
        let sweeper = fleet.correlator().spawn_sweeper(SWEEP_PERIOD);

        // --- Link server ---
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("binding link server to {}", self.config.listen_addr))?;
        let (report_tx, report_rx) = mpsc::channel(REPORT_BUFFER);
        let link_server = tokio::spawn(run_link_server(
            listener,
            Arc::clone(&fleet),
            report_tx,
        ));

        // --- Report router ---
        let scorer = Arc::new(
            ScorerClient::new(
                &self.config.scorer.base_url,
                self.config.scorer.batch_size,
                Duration::from_secs(self.config.scorer.timeout_seconds),
            )
            .context("building scorer client")?,
        );
        let router_ctx = RouterContext {
            corpus,
            scorer,
            scan_store: Arc::clone(&store) as Arc<dyn ScanStore>,
            flag_threshold: self.config.scorer.flag_threshold,
        };
        let router = tokio::spawn(run_report_router(report_rx, router_ctx));

        // --- Scheduler ---
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::new(FleetDispatcher::new(Arc::clone(&fleet))),
            self.config.tick_interval(),
        );
        let scheduler_task = tokio::spawn(scheduler.run());

        info!("hivewarden daemon started");

        // --- Run until a signal or a fatal listener error ---
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
            tokio::select! {
                result = link_server => {
                    match result {
                        Ok(Err(e)) => error!(error = %e, "link server exited with error"),
                        Ok(Ok(())) => warn!("link server exited"),
                        Err(e) => error!(error = %e, "link server task failed"),
                    }
                }
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                _ = sigint.recv() => info!("SIGINT received, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                result = link_server => {
                    match result {
                        Ok(Err(e)) => error!(error = %e, "link server exited with error"),
                        Ok(Ok(())) => warn!("link server exited"),
                        Err(e) => error!(error = %e, "link server task failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
            }
        }

        // --- Cleanup ---
        scheduler_task.abort();
        router.abort();
        sweeper.abort();
        remove_pid_file(&pid_path);
        info!("daemon shut down");
        Ok(())
    }
}

/// PID file lives next to the server database.
fn pid_file_path(config: &HiveConfig) -> PathBuf {
    config
        .db_path
        .parent()
        .unwrap_or_else(|| Path::new("/tmp"))
        .join("hivewarden.pid")
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("writing PID file: {}", path.display()))?;
    info!(pid = pid, path = %path.display(), "wrote PID file");
    Ok(())
}

fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove PID file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pid_file_creation_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("test.pid");
        write_pid_file(&pid_path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&pid_path).unwrap(),
            std::process::id().to_string()
        );
        remove_pid_file(&pid_path);
        assert!(!pid_path.exists());
    }

    #[test]
    fn pid_path_follows_db_path() {
        let mut config = HiveConfig::default();
        config.db_path = PathBuf::from("/srv/hivewarden/server.db");
        assert_eq!(
            pid_file_path(&config),
            PathBuf::from("/srv/hivewarden/hivewarden.pid")
        );
    }
}
