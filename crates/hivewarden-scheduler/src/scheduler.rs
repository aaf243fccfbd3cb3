//! The scheduler tick loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hivewarden_core::store::TaskStore;
use hivewarden_core::types::{
    AgentId, CommandKind, CommandOutcome, Principal, ScheduledTask, TaskRun,
};

use crate::cron::Schedule;

/// The fleet surface the scheduler dispatches through. Implementations
/// decide timeouts; a dispatch error (for example an offline agent) is a
/// normal task outcome, not a scheduler failure.
#[async_trait]
pub trait CommandDispatcher: Send + Sync + 'static {
    async fn dispatch(
        &self,
        agent_id: &AgentId,
        command: CommandKind,
        issued_by: Principal,
    ) -> anyhow::Result<CommandOutcome>;
}

pub struct Scheduler<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    tick_interval: Duration,
}

impl<S, D> Scheduler<S, D>
where
    S: TaskStore + 'static,
    D: CommandDispatcher,
{
    pub fn new(store: Arc<S>, dispatcher: Arc<D>, tick_interval: Duration) -> Self {
        Self {
            store,
            dispatcher,
            tick_interval,
        }
    }

    /// Run the tick loop until the task is aborted. Dispatches are spawned,
    /// so a slow agent can never stall the next tick.
    pub async fn run(self) {
        info!(tick_secs = self.tick_interval.as_secs(), "scheduler started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick_once(Utc::now());
        }
    }

    /// Check every enabled task against `now` and fire the due ones.
    /// Returns how many were fired. One task's failure never prevents the
    /// rest of the tick from running.
    pub fn tick_once(&self, now: DateTime<Utc>) -> usize {
        let tasks = match self.store.enabled_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to load scheduled tasks, skipping tick");
                return 0;
            }
        };

        let mut fired = 0;
        for task in tasks {
            let schedule =
                match Schedule::parse(task.cron_expr.as_deref(), task.interval_seconds) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        // A malformed stored schedule must not crash the
                        // tick loop; the task is simply never due.
                        warn!(task_id = %task.id, error = %e,
                              "task has a malformed schedule, treating as never due");
                        continue;
                    }
                };

            if !schedule.is_due(task.last_fired_at, task.created_at, now) {
                continue;
            }

            // Record the firing before dispatching so a slow dispatch can
            // never let a later tick fire the same occurrence again.
            if let Err(e) = self.store.mark_fired(&task.id, now) {
                error!(task_id = %task.id, error = %e, "failed to mark task fired");
                continue;
            }
            fired += 1;
            debug!(task_id = %task.id, name = %task.name, "firing scheduled task");

            let store = Arc::clone(&self.store);
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(run_task(store, dispatcher, task, now));
        }
        fired
    }
}

/// Dispatch one fired task and append its TaskRun once the command
/// resolves.
async fn run_task<S, D>(store: Arc<S>, dispatcher: Arc<D>, task: ScheduledTask, fired_at: DateTime<Utc>)
where
    S: TaskStore,
    D: CommandDispatcher,
{
    let (outcome, detail) = match dispatcher
        .dispatch(
            &task.agent_id,
            task.command.clone(),
            Principal::system("scheduler"),
        )
        .await
    {
        Ok(CommandOutcome::Succeeded { output }) => ("succeeded".to_string(), Some(output)),
        Ok(CommandOutcome::Failed { error }) => ("failed".to_string(), Some(error)),
        Ok(other) => (other.label().to_string(), None),
        Err(e) => ("dispatch_error".to_string(), Some(e.to_string())),
    };

    let run = TaskRun {
        id: Uuid::new_v4().simple().to_string(),
        task_id: task.id.clone(),
        agent_id: task.agent_id.clone(),
        fired_at,
        outcome,
        detail,
    };
    if let Err(e) = store.record_run(&run) {
        error!(task_id = %task.id, error = %e, "failed to record task run");
    }
}
