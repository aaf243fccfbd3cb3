//! Network scan types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hivewarden_core::types::AgentId;

/// One parsed socket-table row plus its kernel TCP statistics. These are
/// the raw inputs to the feature mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocketEntry {
    pub state: String,
    pub local_ip: String,
    pub local_port: u16,
    pub peer_ip: String,
    pub peer_port: u16,
    pub process: String,
    pub pid: Option<u32>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub segs_out: u64,
    pub segs_in: u64,
    pub data_segs_out: u64,
    pub data_segs_in: u64,
    pub rtt_ms: f64,
    pub rtt_var_ms: f64,
    pub mss: u64,
    pub cwnd: u64,
    pub wscale_snd: u32,
    pub wscale_rcv: u32,
    /// Estimated send rate in bytes per second.
    pub send_rate: f64,
    pub retrans: u64,
}

/// Parser output: structured rows plus the count of lines that did not
/// match the expected column shape.
#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub entries: Vec<SocketEntry>,
    pub parse_failures: usize,
}

/// One connection with its anomaly score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredConnection {
    pub state: String,
    pub local_ip: String,
    pub local_port: u16,
    pub peer_ip: String,
    pub peer_port: u16,
    pub process: String,
    pub pid: Option<u32>,
    pub score: f64,
    /// Score crossed the configured threshold.
    pub flagged: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub total: usize,
    pub flagged: usize,
    pub mean_score: f64,
    pub max_score: f64,
}

/// Outcome of one network scan for one agent. An unreachable scorer fails
/// the scan instead of producing an empty result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkScanResult {
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub connections: Vec<ScoredConnection>,
    pub parse_failures: usize,
    pub summary: NetworkSummary,
}
