//! Thread-safe in-memory registry of agents and their live connections.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use hivewarden_core::protocol::ServerMessage;
use hivewarden_core::types::{AgentId, AgentRecord, SystemMetrics};

/// Bounded per-agent metrics history (about ten minutes at the agents'
/// default reporting interval).
const MAX_METRICS_HISTORY: usize = 60;

/// Outbound side of one agent connection. Cheap to clone; dropping every
/// clone ends the connection's writer task.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<ServerMessage>,
    connection_id: Uuid,
}

impl LinkHandle {
    pub fn new(tx: mpsc::Sender<ServerMessage>, connection_id: Uuid) -> Self {
        Self { tx, connection_id }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue a message for the connection's writer. Fails when the
    /// connection is gone.
    pub async fn send(&self, msg: ServerMessage) -> crate::Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| crate::FleetError::LinkClosed)
    }
}

struct AgentEntry {
    record: AgentRecord,
    link: Option<LinkHandle>,
    metrics_history: VecDeque<SystemMetrics>,
}

/// The live set of agents. The record for an agent persists across
/// reconnects; only the link handle comes and goes.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection for an agent, creating the record on
    /// first contact. A prior handle is replaced: last writer wins, and
    /// the replaced connection's writer ends when its handle drops.
    pub async fn register(
        &self,
        agent_id: &AgentId,
        hostname: String,
        platform: String,
        agent_version: String,
        handle: LinkHandle,
    ) {
        let now = Utc::now();
        let mut agents = self.agents.write().await;
        match agents.get_mut(agent_id) {
            Some(entry) => {
                if entry.link.is_some() {
                    debug!(agent_id = %agent_id, "replacing existing link for agent");
                }
                entry.record.hostname = hostname;
                entry.record.platform = platform;
                entry.record.agent_version = agent_version;
                entry.record.last_seen = now;
                entry.record.online = true;
                entry.link = Some(handle);
            }
            None => {
                agents.insert(
                    agent_id.clone(),
                    AgentEntry {
                        record: AgentRecord {
                            id: agent_id.clone(),
                            hostname,
                            platform,
                            agent_version,
                            first_seen: now,
                            last_seen: now,
                            online: true,
                            last_metrics: None,
                        },
                        link: Some(handle),
                        metrics_history: VecDeque::new(),
                    },
                );
            }
        }
    }

    /// Clear the link for an agent, keeping its record. Only clears when
    /// the stored link still belongs to `connection_id`, so a stale reader
    /// task cannot knock out a newer connection. Returns whether a link
    /// was cleared.
    pub async fn unregister(&self, agent_id: &AgentId, connection_id: Uuid) -> bool {
        let mut agents = self.agents.write().await;
        let Some(entry) = agents.get_mut(agent_id) else {
            return false;
        };
        match &entry.link {
            Some(link) if link.connection_id() == connection_id => {
                entry.link = None;
                entry.record.online = false;
                entry.record.last_seen = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|entry| entry.record.clone())
    }

    pub async fn is_online(&self, agent_id: &AgentId) -> bool {
        self.agents
            .read()
            .await
            .get(agent_id)
            .is_some_and(|entry| entry.link.is_some())
    }

    /// The live link for an agent, if any.
    pub async fn link(&self, agent_id: &AgentId) -> Option<LinkHandle> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .and_then(|entry| entry.link.clone())
    }

    pub async fn all_agents(&self) -> Vec<AgentRecord> {
        let mut records: Vec<_> = self
            .agents
            .read()
            .await
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        records
    }

    /// Record an unsolicited metrics report.
    pub async fn record_metrics(&self, agent_id: &AgentId, metrics: SystemMetrics) {
        let mut agents = self.agents.write().await;
        let Some(entry) = agents.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "metrics report from unknown agent, dropping");
            return;
        };
        entry.record.last_seen = Utc::now();
        entry.record.last_metrics = Some(metrics.clone());
        entry.metrics_history.push_back(metrics);
        while entry.metrics_history.len() > MAX_METRICS_HISTORY {
            entry.metrics_history.pop_front();
        }
    }

    pub async fn metrics_history(&self, agent_id: &AgentId) -> Vec<SystemMetrics> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|entry| entry.metrics_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send a message to every connected agent matching the predicate.
    /// Best-effort: one agent's full queue or dead link never aborts
    /// delivery to the rest. Returns how many sends were queued.
    pub async fn broadcast(
        &self,
        predicate: impl Fn(&AgentRecord) -> bool,
        msg: &ServerMessage,
    ) -> usize {
        let targets: Vec<(AgentId, LinkHandle)> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|entry| predicate(&entry.record))
                .filter_map(|entry| {
                    entry
                        .link
                        .clone()
                        .map(|link| (entry.record.id.clone(), link))
                })
                .collect()
        };

        let mut delivered = 0;
        for (agent_id, link) in targets {
            if link.send(msg.clone()).await.is_ok() {
                delivered += 1;
            } else {
                warn!(agent_id = %agent_id, "broadcast send failed, skipping agent");
            }
        }
        delivered
    }
}
