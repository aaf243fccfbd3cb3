//! TCP JSON-lines link server for agent connections.
//!
//! One task per connection reads agent messages and routes them; a writer
//! task drains the outbound queue. The first line on a fresh connection
//! must be the handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hivewarden_core::protocol::{encode_line, AgentMessage, ReportKind, ServerMessage};
use hivewarden_core::types::AgentId;

use crate::fleet::Fleet;
use crate::registry::LinkHandle;
use crate::Result;

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 64;

/// A scan payload reported by an agent, routed to the matching pipeline by
/// the daemon.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub agent_id: AgentId,
    pub correlation_id: Option<Uuid>,
    pub kind: ReportKind,
    pub payload: String,
}

/// Accept agent connections until the listener fails or the task is
/// aborted.
pub async fn run_link_server(
    listener: TcpListener,
    fleet: Arc<Fleet>,
    reports: mpsc::Sender<AgentReport>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "agent link server listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let fleet = Arc::clone(&fleet);
                let reports = reports.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, fleet, reports).await {
                        debug!(peer = %peer, error = %e, "agent link closed");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept agent connection");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    fleet: Arc<Fleet>,
    reports: mpsc::Sender<AgentReport>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // --- Handshake ---
    if reader.read_line(&mut line).await? == 0 {
        debug!(peer = %peer, "connection closed before handshake");
        return Ok(());
    }
    let hello: AgentMessage = serde_json::from_str(line.trim())?;
    let AgentMessage::Hello {
        agent_id,
        hostname,
        platform,
        agent_version,
    } = hello
    else {
        warn!(peer = %peer, "first message was not a handshake, dropping connection");
        return Ok(());
    };

    // --- Writer task ---
    let connection_id = Uuid::new_v4();
    let (tx, mut outbound) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let line = match encode_line(&msg) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let handle = LinkHandle::new(tx, connection_id);
    fleet
        .registry()
        .register(&agent_id, hostname, platform, agent_version, handle.clone())
        .await;
    // Acked only after registration, so an agent that has seen the welcome
    // is guaranteed to be dispatchable.
    let welcome = ServerMessage::Welcome {
        agent_id: agent_id.clone(),
        server_time: Utc::now(),
    };
    let _ = handle.send(welcome).await;
    info!(agent_id = %agent_id, peer = %peer, "agent connected");

    // --- Read loop ---
    loop {
        line.clear();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                debug!(agent_id = %agent_id, error = %e, "agent link read error");
                break;
            }
        };
        if n == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<AgentMessage>(trimmed) {
            Ok(AgentMessage::Hello { .. }) => {
                warn!(agent_id = %agent_id, "duplicate handshake on established link, ignoring");
            }
            Ok(AgentMessage::CommandResult {
                correlation_id,
                exit_code,
                output,
            }) => {
                fleet.on_command_result(correlation_id, exit_code, output);
            }
            Ok(AgentMessage::Metrics { metrics }) => {
                fleet.registry().record_metrics(&agent_id, metrics).await;
            }
            Ok(AgentMessage::Report {
                correlation_id,
                kind,
                payload,
            }) => {
                let report = AgentReport {
                    agent_id: agent_id.clone(),
                    correlation_id,
                    kind,
                    payload,
                };
                if reports.send(report).await.is_err() {
                    warn!(agent_id = %agent_id, "report router is gone, dropping report");
                }
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "malformed message from agent, ignoring");
            }
        }
    }

    // --- Teardown ---
    fleet.handle_disconnect(&agent_id, connection_id).await;
    writer_task.abort();
    Ok(())
}
