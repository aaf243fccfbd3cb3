//! # hivewarden-netwatch
//!
//! Network-connection anomaly scoring.
//!
//! Agents report a raw `ss -tnpi` socket table; this crate parses it into
//! structured connection records, maps each record into the fixed 26-column
//! feature vector the external scorer expects, batches the vectors through
//! the scorer API, and reduces the returned scores into flagged anomalies.

pub mod error;
pub mod features;
pub mod parser;
pub mod pipeline;
pub mod scorer;
pub mod types;

pub use error::{NetwatchError, Result};
pub use features::{feature_vector, FeatureVector, FEATURE_COLUMNS};
pub use pipeline::scan_socket_table;
pub use scorer::ScorerClient;
pub use types::{NetworkScanResult, SocketEntry};
