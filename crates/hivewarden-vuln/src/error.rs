//! Error types for the vulnerability matcher.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VulnError {
    #[error("unparseable package version: {0:?}")]
    InvalidVersion(String),

    #[error("malformed version range for {cve_id}: {reason}")]
    MalformedRange { cve_id: String, reason: String },

    #[error("corpus database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, VulnError>;
