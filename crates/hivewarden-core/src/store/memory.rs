//! In-memory store implementation for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::store::{CommandAudit, Result, ScanKind, ScanStore, StoredScan, TaskStore};
use crate::types::{AgentId, CommandRecord, ScheduledTask, TaskRun};

#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
    runs: RwLock<Vec<TaskRun>>,
    scans: RwLock<HashMap<(AgentId, ScanKind), StoredScan>>,
    commands: RwLock<Vec<CommandRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskStore for MemoryStore {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let tasks = Self::read(&self.tasks);
        let mut enabled: Vec<_> = tasks.values().filter(|t| t.enabled).cloned().collect();
        enabled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(enabled)
    }

    fn insert_task(&self, task: &ScheduledTask) -> Result<()> {
        Self::write(&self.tasks).insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn mark_fired(&self, task_id: &str, fired_at: DateTime<Utc>) -> Result<()> {
        if let Some(task) = Self::write(&self.tasks).get_mut(task_id) {
            task.last_fired_at = Some(fired_at);
            task.run_count += 1;
        }
        Ok(())
    }

    fn record_run(&self, run: &TaskRun) -> Result<()> {
        Self::write(&self.runs).push(run.clone());
        Ok(())
    }

    fn runs_for_task(&self, task_id: &str, limit: usize) -> Result<Vec<TaskRun>> {
        let runs = Self::read(&self.runs);
        let mut matching: Vec<_> = runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

impl ScanStore for MemoryStore {
    fn save_scan(&self, scan: &StoredScan) -> Result<()> {
        Self::write(&self.scans).insert((scan.agent_id.clone(), scan.kind), scan.clone());
        Ok(())
    }

    fn latest_scan(&self, agent_id: &AgentId, kind: ScanKind) -> Result<Option<StoredScan>> {
        Ok(Self::read(&self.scans)
            .get(&(agent_id.clone(), kind))
            .cloned())
    }
}

impl CommandAudit for MemoryStore {
    fn record_command(&self, record: &CommandRecord) -> Result<()> {
        Self::write(&self.commands).push(record.clone());
        Ok(())
    }

    fn recent_commands(&self, agent_id: &AgentId, limit: usize) -> Result<Vec<CommandRecord>> {
        let commands = Self::read(&self.commands);
        let mut matching: Vec<_> = commands
            .iter()
            .filter(|c| &c.agent_id == agent_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        matching.truncate(limit);
        Ok(matching)
    }
}
