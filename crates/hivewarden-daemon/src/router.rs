//! Scan report routing.
//!
//! Agents answer scan probes with bulk `Report` payloads over their link.
//! The router hands each payload to the matching pipeline and persists the
//! result. Reports are processed on their own tasks so one slow scorer
//! call cannot back up the link readers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use hivewarden_core::protocol::ReportKind;
use hivewarden_core::store::{ScanKind, ScanStore, StoredScan};
use hivewarden_core::types::AgentId;
use hivewarden_fleet::AgentReport;
use hivewarden_netwatch::{scan_socket_table, ScorerClient};
use hivewarden_vuln::{scan_inventory, CveCorpus};

/// Everything a report needs to become a stored scan result.
#[derive(Clone)]
pub struct RouterContext {
    pub corpus: Arc<CveCorpus>,
    pub scorer: Arc<ScorerClient>,
    pub scan_store: Arc<dyn ScanStore>,
    pub flag_threshold: f64,
}

/// Consume reports until the channel closes.
pub async fn run_report_router(mut reports: mpsc::Receiver<AgentReport>, ctx: RouterContext) {
    while let Some(report) = reports.recv().await {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_report(report, ctx).await;
        });
    }
    info!("report router finished");
}

async fn handle_report(report: AgentReport, ctx: RouterContext) {
    let agent_id = report.agent_id.clone();
    match report.kind {
        ReportKind::PackageInventory => {
            // Corpus lookups are synchronous SQLite reads; keep them off
            // the async workers.
            let corpus = Arc::clone(&ctx.corpus);
            let scan_agent = agent_id.clone();
            let scanned = tokio::task::spawn_blocking(move || {
                scan_inventory(&corpus, &scan_agent, &report.payload)
            })
            .await;

            match scanned {
                Ok(Ok(result)) => {
                    info!(agent_id = %agent_id, scanned = result.scanned,
                          findings = result.summary.total,
                          parse_failures = result.parse_failures.len(),
                          "vulnerability scan complete");
                    persist(&ctx, &agent_id, ScanKind::Vulnerability, &result);
                }
                Ok(Err(e)) => {
                    error!(agent_id = %agent_id, error = %e, "vulnerability scan failed");
                }
                Err(e) => {
                    error!(agent_id = %agent_id, error = %e, "vulnerability scan task panicked");
                }
            }
        }
        ReportKind::SocketTable => {
            match scan_socket_table(&ctx.scorer, ctx.flag_threshold, &agent_id, &report.payload)
                .await
            {
                Ok(result) => {
                    if result.parse_failures > 0 {
                        warn!(agent_id = %agent_id, parse_failures = result.parse_failures,
                              "socket table contained unparseable lines");
                    }
                    persist(&ctx, &agent_id, ScanKind::Network, &result);
                }
                // A dead scorer is a failed scan, never an empty one. The
                // previous stored result stays in place.
                Err(e) => {
                    error!(agent_id = %agent_id, error = %e, "network scan failed");
                }
            }
        }
    }
}

fn persist<T: serde::Serialize>(ctx: &RouterContext, agent_id: &AgentId, kind: ScanKind, result: &T) {
    let value = match serde_json::to_value(result) {
        Ok(value) => value,
        Err(e) => {
            error!(agent_id = %agent_id, error = %e, "failed to serialize scan result");
            return;
        }
    };
    let stored = StoredScan {
        agent_id: agent_id.clone(),
        kind,
        completed_at: chrono::Utc::now(),
        result: value,
    };
    if let Err(e) = ctx.scan_store.save_scan(&stored) {
        error!(agent_id = %agent_id, error = %e, "failed to persist scan result");
    }
}
