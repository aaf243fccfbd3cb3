//! End-to-end network scan: parse, featurize, score, reduce.

use chrono::Utc;
use tracing::{debug, info};

use hivewarden_core::types::AgentId;

use crate::features::feature_vector;
use crate::parser::parse_socket_table;
use crate::scorer::ScorerClient;
use crate::types::{NetworkScanResult, NetworkSummary, ScoredConnection};
use crate::Result;

/// Run one network scan over a raw socket-table snapshot.
///
/// Listening sockets are excluded from scoring; only active connections
/// carry the flow statistics the feature mapping needs. A scorer failure
/// fails the whole scan -- parse failures do not.
pub async fn scan_socket_table(
    scorer: &ScorerClient,
    flag_threshold: f64,
    agent_id: &AgentId,
    raw: &str,
) -> Result<NetworkScanResult> {
    let started_at = Utc::now();
    let table = parse_socket_table(raw);
    debug!(agent_id = %agent_id, entries = table.entries.len(),
           parse_failures = table.parse_failures, "parsed socket table");

    let active: Vec<_> = table
        .entries
        .into_iter()
        .filter(|e| e.state != "LISTEN")
        .collect();

    let scores = if active.is_empty() {
        Vec::new()
    } else {
        let vectors: Vec<_> = active.iter().map(feature_vector).collect();
        scorer.score_all(&vectors).await?
    };

    let mut connections: Vec<ScoredConnection> = active
        .into_iter()
        .zip(scores)
        .map(|(entry, score)| ScoredConnection {
            flagged: score >= flag_threshold,
            score,
            state: entry.state,
            local_ip: entry.local_ip,
            local_port: entry.local_port,
            peer_ip: entry.peer_ip,
            peer_port: entry.peer_port,
            process: entry.process,
            pid: entry.pid,
            bytes_sent: entry.bytes_sent,
            bytes_received: entry.bytes_received,
            rtt_ms: entry.rtt_ms,
        })
        .collect();

    // Highest risk first.
    connections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let summary = NetworkSummary {
        total: connections.len(),
        flagged: connections.iter().filter(|c| c.flagged).count(),
        mean_score: if connections.is_empty() {
            0.0
        } else {
            connections.iter().map(|c| c.score).sum::<f64>() / connections.len() as f64
        },
        max_score: connections.first().map(|c| c.score).unwrap_or(0.0),
    };

    info!(agent_id = %agent_id, total = summary.total, flagged = summary.flagged,
          "network scan complete");

    Ok(NetworkScanResult {
        agent_id: agent_id.clone(),
        started_at,
        completed_at: Utc::now(),
        connections,
        parse_failures: table.parse_failures,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetwatchError;

    const SNAPSHOT: &str = "\
State    Recv-Q Send-Q  Local Address:Port   Peer Address:Port  Process
LISTEN   0      128     0.0.0.0:22           0.0.0.0:*
ESTAB    0      0       10.0.0.5:44321       203.0.113.9:443    users:((\"curl\",pid=900,fd=3))
\t rtt:20.0/5.0 mss:1448 bytes_sent:1000 bytes_received:9000 segs_out:10 segs_in:12
ESTAB    0      0       10.0.0.5:44322       198.51.100.4:8443  users:((\"python3\",pid=901,fd=4))
\t rtt:8.0/2.0 mss:1448 bytes_sent:500000 bytes_received:1200 segs_out:400 segs_in:40
not a socket line at all
";

    fn scored_client(server: &mockito::Server) -> ScorerClient {
        ScorerClient::with_http_client(server.url(), 50, reqwest::Client::new())
    }

    #[tokio::test]
    async fn listen_sockets_excluded_and_failures_counted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/batch-score")
            .with_status(200)
            .with_body(r#"{"scores": [0.2, 0.9]}"#)
            .create_async()
            .await;

        let result = scan_socket_table(
            &scored_client(&server),
            0.75,
            &AgentId::new("host-01"),
            SNAPSHOT,
        )
        .await
        .unwrap();

        // LISTEN row excluded, two active connections scored, one garbled
        // line recorded.
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.parse_failures, 1);
        assert_eq!(result.summary.flagged, 1);
        // Sorted by descending score.
        assert_eq!(result.connections[0].process, "python3");
        assert!(result.connections[0].flagged);
        assert!(!result.connections[1].flagged);
        assert!((result.summary.mean_score - 0.55).abs() < 1e-9);
        assert!((result.summary.max_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scorer_failure_fails_scan() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/batch-score")
            .with_status(503)
            .create_async()
            .await;

        let err = scan_socket_table(
            &scored_client(&server),
            0.75,
            &AgentId::new("host-01"),
            SNAPSHOT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NetwatchError::ScorerUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_snapshot_needs_no_scorer() {
        // Unreachable scorer: must not matter when nothing is scoreable.
        let client = ScorerClient::with_http_client(
            "http://127.0.0.1:1",
            50,
            reqwest::Client::new(),
        );
        let result = scan_socket_table(&client, 0.75, &AgentId::new("host-01"), "")
            .await
            .unwrap();
        assert_eq!(result.summary.total, 0);
        assert_eq!(result.summary.max_score, 0.0);
    }
}
