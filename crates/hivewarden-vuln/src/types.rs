//! Vulnerability matching types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hivewarden_core::types::AgentId;

use crate::error::{Result, VulnError};
use crate::version::PackageVersion;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a corpus severity label; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" | "MODERATE" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Version ranges
// ---------------------------------------------------------------------------

/// One end of an affected-version range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBound {
    pub version: PackageVersion,
    pub inclusive: bool,
}

impl VersionBound {
    /// Compare an installed version against this bound. Corpus bounds
    /// normally name an upstream release without a packaging revision;
    /// such a bound covers every revision of that release, so the
    /// installed revision is ignored for the comparison.
    fn compare_installed(&self, installed: &PackageVersion) -> std::cmp::Ordering {
        if self.version.revision.is_empty() && !installed.revision.is_empty() {
            let stripped = PackageVersion {
                epoch: installed.epoch,
                upstream: installed.upstream.clone(),
                revision: String::new(),
            };
            stripped.cmp(&self.version)
        } else {
            installed.cmp(&self.version)
        }
    }
}

/// An affected-version range in the package's native ordering. Either end
/// may be open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub lower: Option<VersionBound>,
    pub upper: Option<VersionBound>,
}

impl VersionRange {
    /// Well-formedness check applied at corpus load time: when both ends
    /// are present, lower must not exceed upper.
    pub fn validate(&self, cve_id: &str) -> Result<()> {
        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            if lower.version > upper.version {
                return Err(VulnError::MalformedRange {
                    cve_id: cve_id.to_string(),
                    reason: format!(
                        "lower bound {} exceeds upper bound {}",
                        lower.version, upper.version
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, version: &PackageVersion) -> bool {
        use std::cmp::Ordering::*;
        let above_lower = match &self.lower {
            None => true,
            Some(bound) => match bound.compare_installed(version) {
                Greater => true,
                Equal => bound.inclusive,
                Less => false,
            },
        };
        let below_upper = match &self.upper {
            None => true,
            Some(bound) => match bound.compare_installed(version) {
                Less => true,
                Equal => bound.inclusive,
                Greater => false,
            },
        };
        above_lower && below_upper
    }
}

// ---------------------------------------------------------------------------
// Corpus entries and scan results
// ---------------------------------------------------------------------------

/// One CVE applicability rule from the corpus, already validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnEntry {
    pub cve_id: String,
    pub package: String,
    pub range: VersionRange,
    pub severity: Severity,
    pub cvss_score: Option<f64>,
    pub title: String,
}

/// A CVE that applied to an installed package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedCve {
    pub cve_id: String,
    pub severity: Severity,
    pub cvss_score: Option<f64>,
    pub title: String,
}

/// All CVEs matched against one installed package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMatch {
    pub package: String,
    pub version: String,
    pub cves: Vec<MatchedCve>,
}

/// A package whose version string could not be parsed. Excluded from
/// matching without failing the scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionParseFailure {
    pub package: String,
    pub raw_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VulnSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl VulnSummary {
    pub fn tally(matches: &[PackageMatch]) -> Self {
        let mut summary = Self::default();
        for cve in matches.iter().flat_map(|m| &m.cves) {
            summary.total += 1;
            match cve.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => {}
            }
        }
        summary
    }
}

/// Outcome of one vulnerability scan for one agent. Distinguishes "no
/// applicable findings" (empty `matches`) from a scan that could not run
/// (the pipeline returns an error instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnScanResult {
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Installed packages seen in the inventory.
    pub scanned: usize,
    pub matches: Vec<PackageMatch>,
    pub parse_failures: Vec<VersionParseFailure>,
    pub summary: VulnSummary,
}
