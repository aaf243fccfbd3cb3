//! Adapter exposing the fleet's dispatch API to the scheduler.

use std::sync::Arc;

use async_trait::async_trait;

use hivewarden_core::types::{AgentId, CommandKind, CommandOutcome, Principal};
use hivewarden_fleet::Fleet;
use hivewarden_scheduler::CommandDispatcher;

pub struct FleetDispatcher {
    fleet: Arc<Fleet>,
}

impl FleetDispatcher {
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl CommandDispatcher for FleetDispatcher {
    async fn dispatch(
        &self,
        agent_id: &AgentId,
        command: CommandKind,
        issued_by: Principal,
    ) -> anyhow::Result<CommandOutcome> {
        Ok(self.fleet.dispatch(agent_id, command, &issued_by).await?)
    }
}
