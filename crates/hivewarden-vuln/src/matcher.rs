//! CVE matching over an agent-reported package inventory.

use chrono::Utc;
use tracing::debug;

use hivewarden_core::types::AgentId;

use crate::corpus::CveCorpus;
use crate::dpkg;
use crate::error::Result;
use crate::types::{
    MatchedCve, PackageMatch, VersionParseFailure, VulnScanResult, VulnSummary,
};
use crate::version::PackageVersion;

/// Match a raw `dpkg -l` inventory against the corpus.
///
/// Per-package version parse failures are accumulated in the result and the
/// package excluded from matching; only a corpus failure aborts the scan.
pub fn scan_inventory(
    corpus: &CveCorpus,
    agent_id: &AgentId,
    raw_inventory: &str,
) -> Result<VulnScanResult> {
    let started_at = Utc::now();
    let packages = dpkg::parse_inventory(raw_inventory);

    let mut matches = Vec::new();
    let mut parse_failures = Vec::new();

    for package in &packages {
        let installed = match PackageVersion::parse(&package.raw_version) {
            Ok(version) => version,
            Err(_) => {
                debug!(package = %package.name, version = %package.raw_version,
                       "skipping package with unparseable version");
                parse_failures.push(VersionParseFailure {
                    package: package.name.clone(),
                    raw_version: package.raw_version.clone(),
                });
                continue;
            }
        };

        let candidates = corpus.candidates(&package.name)?;
        if candidates.is_empty() {
            continue;
        }

        let mut cves: Vec<MatchedCve> = candidates
            .into_iter()
            .filter(|entry| entry.range.contains(&installed))
            .map(|entry| MatchedCve {
                cve_id: entry.cve_id,
                severity: entry.severity,
                cvss_score: entry.cvss_score,
                title: entry.title,
            })
            .collect();

        if cves.is_empty() {
            continue;
        }
        cves.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.cve_id.cmp(&b.cve_id))
        });
        matches.push(PackageMatch {
            package: package.name.clone(),
            version: package.raw_version.clone(),
            cves,
        });
    }

    matches.sort_by(|a, b| {
        let worst = |m: &PackageMatch| m.cves.first().map(|c| c.severity);
        worst(b)
            .cmp(&worst(a))
            .then_with(|| a.package.cmp(&b.package))
    });

    let summary = VulnSummary::tally(&matches);
    Ok(VulnScanResult {
        agent_id: agent_id.clone(),
        started_at,
        completed_at: Utc::now(),
        scanned: packages.len(),
        matches,
        parse_failures,
        summary,
    })
}
