//! CVE corpus: read-only applicability rules keyed by package name.
//!
//! The corpus is imported out of band; this module only loads pre-built
//! record sets and serves candidate lookups. Range validation happens here,
//! at load time -- the matcher never sees a malformed range.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::Result;
use crate::types::{Severity, VersionBound, VersionRange, VulnEntry};
use crate::version::PackageVersion;

/// A raw corpus record as produced by the external importer. Versions are
/// strings here; parsing and validation happen in [`CveCorpus::load`].
#[derive(Debug, Clone)]
pub struct CorpusRecord {
    pub cve_id: String,
    pub package: String,
    pub lower_version: Option<String>,
    pub lower_inclusive: bool,
    pub upper_version: Option<String>,
    pub upper_inclusive: bool,
    pub severity: String,
    pub cvss_score: Option<f64>,
    pub title: String,
}

/// Counts from one corpus load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub rejected: usize,
}

pub struct CveCorpus {
    db: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cve_rules (
    cve_id          TEXT NOT NULL,
    package         TEXT NOT NULL,
    lower_version   TEXT,
    lower_inclusive INTEGER NOT NULL DEFAULT 1,
    upper_version   TEXT,
    upper_inclusive INTEGER NOT NULL DEFAULT 1,
    severity        TEXT NOT NULL,
    cvss_score      REAL,
    title           TEXT NOT NULL,
    PRIMARY KEY (cve_id, package)
);
CREATE INDEX IF NOT EXISTS idx_cve_rules_package ON cve_rules (package);
";

impl CveCorpus {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load records into the corpus. Records with an unparseable bound or
    /// an inverted range are rejected with a warning and counted; they are
    /// never stored, so match time only deals with well-formed ranges.
    pub fn load(&self, records: impl IntoIterator<Item = CorpusRecord>) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let db = self.lock();

        for record in records {
            match validate_record(&record) {
                Ok(()) => {
                    db.execute(
                        "INSERT OR REPLACE INTO cve_rules
                         (cve_id, package, lower_version, lower_inclusive,
                          upper_version, upper_inclusive, severity, cvss_score, title)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            record.cve_id,
                            record.package.to_ascii_lowercase(),
                            record.lower_version,
                            record.lower_inclusive as i64,
                            record.upper_version,
                            record.upper_inclusive as i64,
                            record.severity,
                            record.cvss_score,
                            record.title,
                        ],
                    )?;
                    stats.loaded += 1;
                }
                Err(e) => {
                    warn!(cve_id = %record.cve_id, package = %record.package, error = %e,
                          "rejecting malformed corpus record");
                    stats.rejected += 1;
                }
            }
        }
        Ok(stats)
    }

    /// All applicability rules for the given package name. Zero candidates
    /// is the common case and not an error.
    pub fn candidates(&self, package: &str) -> Result<Vec<VulnEntry>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT cve_id, package, lower_version, lower_inclusive,
                    upper_version, upper_inclusive, severity, cvss_score, title
             FROM cve_rules WHERE package = ?1",
        )?;
        let rows = stmt
            .query_map(params![package.to_ascii_lowercase()], |row| {
                Ok(CorpusRecord {
                    cve_id: row.get("cve_id")?,
                    package: row.get("package")?,
                    lower_version: row.get("lower_version")?,
                    lower_inclusive: row.get::<_, i64>("lower_inclusive")? != 0,
                    upper_version: row.get("upper_version")?,
                    upper_inclusive: row.get::<_, i64>("upper_inclusive")? != 0,
                    severity: row.get("severity")?,
                    cvss_score: row.get("cvss_score")?,
                    title: row.get("title")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for record in rows {
            // Stored records passed validation, so a parse failure here
            // means the database was modified underneath us.
            match record_to_entry(&record) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(cve_id = %record.cve_id, error = %e,
                          "skipping corrupt corpus row");
                }
            }
        }
        Ok(entries)
    }
}

fn parse_bound(version: Option<&str>, inclusive: bool) -> Result<Option<VersionBound>> {
    match version {
        None => Ok(None),
        Some(raw) => Ok(Some(VersionBound {
            version: PackageVersion::parse(raw)?,
            inclusive,
        })),
    }
}

fn record_to_entry(record: &CorpusRecord) -> Result<VulnEntry> {
    let range = VersionRange {
        lower: parse_bound(record.lower_version.as_deref(), record.lower_inclusive)?,
        upper: parse_bound(record.upper_version.as_deref(), record.upper_inclusive)?,
    };
    Ok(VulnEntry {
        cve_id: record.cve_id.clone(),
        package: record.package.clone(),
        range,
        severity: Severity::from_label(&record.severity),
        cvss_score: record.cvss_score,
        title: record.title.clone(),
    })
}

fn validate_record(record: &CorpusRecord) -> Result<()> {
    let entry = record_to_entry(record)?;
    entry.range.validate(&record.cve_id)
}
