//! Fleet facade: command dispatch over the registry and correlator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use hivewarden_core::protocol::ServerMessage;
use hivewarden_core::store::CommandAudit;
use hivewarden_core::types::{AgentId, CommandKind, CommandOutcome, CommandRecord, Principal};

use crate::correlator::Correlator;
use crate::error::{FleetError, Result};
use crate::registry::AgentRegistry;

pub struct Fleet {
    registry: AgentRegistry,
    correlator: Arc<Correlator>,
    audit: Option<Arc<dyn CommandAudit>>,
    command_timeout: Duration,
}

impl Fleet {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            registry: AgentRegistry::new(),
            correlator: Arc::new(Correlator::new()),
            audit: None,
            command_timeout,
        }
    }

    /// Record every terminal command outcome through the given audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn CommandAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Dispatch a command to an agent and wait for its terminal outcome.
    ///
    /// Fails immediately with [`FleetError::AgentOffline`] when the agent
    /// has no live connection -- no pending entry is created. Otherwise
    /// the caller suspends until a matching response arrives, the timeout
    /// sweep expires the command, or the agent disconnects.
    pub async fn dispatch(
        &self,
        agent_id: &AgentId,
        command: CommandKind,
        issued_by: &Principal,
    ) -> Result<CommandOutcome> {
        let Some(link) = self.registry.link(agent_id).await else {
            return Err(FleetError::AgentOffline(agent_id.clone()));
        };

        let correlation_id = Uuid::new_v4();
        let issued_at = Utc::now();
        let rx = self
            .correlator
            .register(correlation_id, agent_id.clone(), self.command_timeout);

        let msg = ServerMessage::Command {
            correlation_id,
            command: command.clone(),
        };
        if link.send(msg).await.is_err() {
            // The writer died between lookup and send; the command never
            // left the server, so withdraw it instead of timing it out.
            self.correlator.discard(correlation_id);
            return Err(FleetError::AgentOffline(agent_id.clone()));
        }
        debug!(agent_id = %agent_id, correlation_id = %correlation_id,
               command = command.label(), issued_by = %issued_by, "command dispatched");

        // The sender side is owned by the correlator; an error here would
        // mean the slot was dropped unresolved, which the correlator never
        // does. Map it to the disconnect outcome anyway.
        let outcome = rx.await.unwrap_or(CommandOutcome::AgentWentOffline);

        if let Some(audit) = &self.audit {
            let record = CommandRecord {
                correlation_id,
                agent_id: agent_id.clone(),
                command,
                issued_by: issued_by.clone(),
                issued_at,
                completed_at: Utc::now(),
                outcome: outcome.clone(),
            };
            if let Err(e) = audit.record_command(&record) {
                error!(correlation_id = %correlation_id, error = %e,
                       "failed to write command audit record");
            }
        }
        Ok(outcome)
    }

    /// Route a command response from an agent's link. Unmatched correlation
    /// IDs are logged and dropped: the command may have timed out already,
    /// or the agent retried across a reconnect.
    pub fn on_command_result(&self, correlation_id: Uuid, exit_code: i32, output: String) {
        let outcome = if exit_code == 0 {
            CommandOutcome::Succeeded { output }
        } else {
            CommandOutcome::Failed {
                error: format!("exit code {exit_code}: {output}"),
            }
        };
        if !self.correlator.resolve(correlation_id, outcome) {
            debug!(correlation_id = %correlation_id,
                   "response for unknown or already-resolved command, dropping");
        }
    }

    /// Tear down one connection: clear the link (if it is still the
    /// current one) and resolve everything pending against the agent.
    /// A reconnected agent's fresh link is left untouched, and its old
    /// pending commands still expire through the normal timeout sweep.
    pub async fn handle_disconnect(&self, agent_id: &AgentId, connection_id: Uuid) {
        if self.registry.unregister(agent_id, connection_id).await {
            let failed = self
                .correlator
                .fail_agent(agent_id, &CommandOutcome::AgentWentOffline);
            info!(agent_id = %agent_id, cancelled = failed, "agent disconnected");
        }
    }
}
