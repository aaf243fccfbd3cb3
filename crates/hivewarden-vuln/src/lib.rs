//! # hivewarden-vuln
//!
//! Host vulnerability exposure from installed-package inventories.
//!
//! Agents report their `dpkg -l` listing; this crate parses it, looks up
//! CVE candidates per package in the corpus, and decides applicability with
//! Debian-policy version-range comparison. Unparseable versions become
//! per-package failures in the result, never a failed scan.

pub mod corpus;
pub mod dpkg;
pub mod error;
pub mod matcher;
pub mod types;
pub mod version;

pub use corpus::{CorpusRecord, CveCorpus, LoadStats};
pub use error::{Result, VulnError};
pub use matcher::scan_inventory;
pub use types::{VulnEntry, VulnScanResult};
pub use version::PackageVersion;
