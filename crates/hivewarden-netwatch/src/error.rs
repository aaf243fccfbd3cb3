//! Error types for the network anomaly pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetwatchError {
    /// The external scorer was unreachable or returned an unusable
    /// response. The scan fails loudly; it is never treated as "no
    /// anomalies".
    #[error("anomaly scorer unavailable: {0}")]
    ScorerUnavailable(String),
}

pub type Result<T> = std::result::Result<T, NetwatchError>;
