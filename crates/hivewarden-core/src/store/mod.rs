//! Durable-store contracts.
//!
//! The relational store is an external collaborator with per-statement ACID
//! semantics; the fleet runtime only needs the narrow surfaces defined here.
//! [`SqliteStore`] is the production implementation, [`MemoryStore`] backs
//! tests and ephemeral runs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AgentId, CommandRecord, ScheduledTask, TaskRun};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Which scan pipeline produced a stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Vulnerability,
    Network,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Vulnerability => "vulnerability",
            ScanKind::Network => "network",
        }
    }
}

/// A persisted scan result. The payload is the pipeline's own result type,
/// stored as JSON so the store stays agnostic of pipeline internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScan {
    pub agent_id: AgentId,
    pub kind: ScanKind,
    pub completed_at: DateTime<Utc>,
    pub result: serde_json::Value,
}

/// Scheduled-task surface needed by the scheduler. Task CRUD beyond
/// `insert_task` belongs to the external operator API.
pub trait TaskStore: Send + Sync {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>>;
    fn insert_task(&self, task: &ScheduledTask) -> Result<()>;
    /// Update last-fired bookkeeping after a task fires.
    fn mark_fired(&self, task_id: &str, fired_at: DateTime<Utc>) -> Result<()>;
    fn record_run(&self, run: &TaskRun) -> Result<()>;
    fn runs_for_task(&self, task_id: &str, limit: usize) -> Result<Vec<TaskRun>>;
}

/// Latest-scan-per-agent storage for both pipelines.
pub trait ScanStore: Send + Sync {
    fn save_scan(&self, scan: &StoredScan) -> Result<()>;
    fn latest_scan(&self, agent_id: &AgentId, kind: ScanKind) -> Result<Option<StoredScan>>;
}

/// Append-only audit of dispatched commands and their terminal outcomes.
pub trait CommandAudit: Send + Sync {
    fn record_command(&self, record: &CommandRecord) -> Result<()>;
    fn recent_commands(&self, agent_id: &AgentId, limit: usize) -> Result<Vec<CommandRecord>>;
}
