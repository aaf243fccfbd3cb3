//! Command/response correlation.
//!
//! Every dispatched command parks a resolution slot here, keyed by its
//! correlation ID. A response, a timeout sweep, or the agent's disconnect
//! resolves the slot; whichever happens first wins and later attempts find
//! nothing, which is what makes completion idempotent. Expiry is handled
//! by one periodic sweep over the map, not per-command timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use hivewarden_core::types::{AgentId, CommandOutcome};

struct PendingCommand {
    agent_id: AgentId,
    reply: oneshot::Sender<CommandOutcome>,
    deadline: Instant,
}

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Uuid, PendingCommand>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingCommand>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park a resolution slot for a freshly dispatched command and return
    /// the receiver its caller awaits.
    pub fn register(
        &self,
        correlation_id: Uuid,
        agent_id: AgentId,
        timeout: Duration,
    ) -> oneshot::Receiver<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.lock().insert(
            correlation_id,
            PendingCommand {
                agent_id,
                reply,
                deadline: Instant::now() + timeout,
            },
        );
        rx
    }

    /// Resolve a pending command. Returns false when the ID is unknown --
    /// either never dispatched or already resolved; the caller logs and
    /// drops such responses rather than treating them as errors.
    pub fn resolve(&self, correlation_id: Uuid, outcome: CommandOutcome) -> bool {
        let Some(pending) = self.lock().remove(&correlation_id) else {
            return false;
        };
        // The dispatcher may have given up waiting; that is fine.
        let _ = pending.reply.send(outcome);
        true
    }

    /// Remove a slot without resolving it (dispatch failed after
    /// registration, before the command ever reached the agent).
    pub fn discard(&self, correlation_id: Uuid) {
        self.lock().remove(&correlation_id);
    }

    /// Resolve every pending command for one agent with the given outcome.
    /// Used on disconnect so nothing leaks waiting for a dead link.
    pub fn fail_agent(&self, agent_id: &AgentId, outcome: &CommandOutcome) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut pending = self.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| &p.agent_id == agent_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(outcome.clone());
        }
        if count > 0 {
            debug!(agent_id = %agent_id, count, "failed pending commands for agent");
        }
        count
    }

    /// Expire every command whose deadline has passed. Returns how many
    /// timed out.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<PendingCommand> = {
            let mut pending = self.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let count = expired.len();
        for entry in expired {
            trace!(agent_id = %entry.agent_id, "expiring pending command");
            let _ = entry.reply.send(CommandOutcome::TimedOut);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = correlator.sweep_expired(Instant::now());
                if expired > 0 {
                    debug!(expired, "expired pending commands");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_ok() -> CommandOutcome {
        CommandOutcome::Succeeded {
            output: "done".into(),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let correlator = Correlator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id, AgentId::new("host-01"), Duration::from_secs(5));

        assert!(correlator.resolve(id, outcome_ok()));
        assert_eq!(rx.await.unwrap(), outcome_ok());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_resolution_is_a_noop() {
        let correlator = Correlator::new();
        let id = Uuid::new_v4();
        let _rx = correlator.register(id, AgentId::new("host-01"), Duration::from_secs(5));

        assert!(correlator.resolve(id, outcome_ok()));
        assert!(!correlator.resolve(id, CommandOutcome::TimedOut));
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_dropped() {
        let correlator = Correlator::new();
        assert!(!correlator.resolve(Uuid::new_v4(), outcome_ok()));
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_commands() {
        let correlator = Correlator::new();
        let expired_id = Uuid::new_v4();
        let fresh_id = Uuid::new_v4();
        let rx_expired =
            correlator.register(expired_id, AgentId::new("host-01"), Duration::from_millis(0));
        let _rx_fresh =
            correlator.register(fresh_id, AgentId::new("host-01"), Duration::from_secs(60));

        let swept = correlator.sweep_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(swept, 1);
        assert_eq!(rx_expired.await.unwrap(), CommandOutcome::TimedOut);
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn late_response_after_expiry_is_ignored() {
        let correlator = Correlator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id, AgentId::new("host-01"), Duration::from_millis(0));

        correlator.sweep_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(rx.await.unwrap(), CommandOutcome::TimedOut);

        // The response arrives after the timeout already resolved it.
        assert!(!correlator.resolve(id, outcome_ok()));
    }

    #[tokio::test]
    async fn fail_agent_drains_only_that_agent() {
        let correlator = Correlator::new();
        let a = AgentId::new("host-a");
        let b = AgentId::new("host-b");
        let rx1 = correlator.register(Uuid::new_v4(), a.clone(), Duration::from_secs(60));
        let rx2 = correlator.register(Uuid::new_v4(), a.clone(), Duration::from_secs(60));
        let rx3 = correlator.register(Uuid::new_v4(), a.clone(), Duration::from_secs(60));
        let _rx_other = correlator.register(Uuid::new_v4(), b.clone(), Duration::from_secs(60));

        let failed = correlator.fail_agent(&a, &CommandOutcome::AgentWentOffline);
        assert_eq!(failed, 3);
        for rx in [rx1, rx2, rx3] {
            assert_eq!(rx.await.unwrap(), CommandOutcome::AgentWentOffline);
        }
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn discard_removes_without_resolving() {
        let correlator = Correlator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id, AgentId::new("host-01"), Duration::from_secs(5));
        correlator.discard(id);
        assert_eq!(correlator.pending_count(), 0);
        assert!(rx.await.is_err());
    }
}
