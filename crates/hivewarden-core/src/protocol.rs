//! Link protocol spoken between the daemon and its agents.
//!
//! Each direction carries one JSON object per line over the persistent TCP
//! connection. The first message on a new link must be [`AgentMessage::Hello`];
//! everything after that is routed by message type. Responses are paired
//! with commands purely by correlation ID, never by arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentId, CommandKind, SystemMetrics};

/// A message sent from an agent to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Handshake. Must be the first message on a fresh connection.
    Hello {
        agent_id: AgentId,
        hostname: String,
        platform: String,
        agent_version: String,
    },
    /// Result of a previously dispatched command.
    CommandResult {
        correlation_id: Uuid,
        exit_code: i32,
        output: String,
    },
    /// Unsolicited periodic metrics report.
    Metrics { metrics: SystemMetrics },
    /// Bulk scan payload (package inventory or socket table). Sent in
    /// response to a scan probe command; `correlation_id` ties it back to
    /// the probe when the agent preserved it.
    Report {
        correlation_id: Option<Uuid>,
        kind: ReportKind,
        payload: String,
    },
}

/// Which scan pipeline a [`AgentMessage::Report`] payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    PackageInventory,
    SocketTable,
}

/// A message sent from the daemon to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgement.
    Welcome {
        agent_id: AgentId,
        server_time: DateTime<Utc>,
    },
    /// Execute a command and reply with a `CommandResult` carrying the
    /// same correlation ID.
    Command {
        correlation_id: Uuid,
        command: CommandKind,
    },
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trip() {
        let msg = AgentMessage::Hello {
            agent_id: AgentId::new("host-01"),
            hostname: "web01.example.net".into(),
            platform: "linux/x86_64".into(),
            agent_version: "0.3.1".into(),
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        let back: AgentMessage = serde_json::from_str(line.trim()).unwrap();
        match back {
            AgentMessage::Hello { agent_id, .. } => assert_eq!(agent_id.as_str(), "host-01"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn command_envelope_carries_correlation_id() {
        let id = Uuid::new_v4();
        let msg = ServerMessage::Command {
            correlation_id: id,
            command: CommandKind::SocketTable,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["correlation_id"], id.to_string());
        assert_eq!(json["command"]["kind"], "socket_table");
    }

    #[test]
    fn report_kind_tags() {
        let msg = AgentMessage::Report {
            correlation_id: None,
            kind: ReportKind::PackageInventory,
            payload: "ii curl 8.5.0-2 amd64".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "report");
        assert_eq!(json["kind"], "package_inventory");
    }
}
