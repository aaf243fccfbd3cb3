//! Agent, command, and scheduling types shared across Hivewarden.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Stable identifier for a managed host, reported by the agent in its
/// handshake. Survives reconnects; the registry keys everything by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the registry knows about one agent. The record outlives any single
/// connection: `online` flips with the link, the rest persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub hostname: String,
    pub platform: String,
    pub agent_version: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    /// Most recent metrics report, if the agent has sent one.
    pub last_metrics: Option<SystemMetrics>,
}

/// Periodic host metrics reported unsolicited by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub uptime_secs: u64,
    pub reported_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A command an agent knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    /// Run a shell command line and return its output.
    Shell { command: String },
    /// Report current system metrics immediately.
    CollectMetrics,
    /// Report the installed-package inventory (vulnerability scan probe).
    PackageInventory,
    /// Report the current socket table (network scan probe).
    SocketTable,
}

impl CommandKind {
    /// Short label used in logs and audit rows.
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::Shell { .. } => "shell",
            CommandKind::CollectMetrics => "collect_metrics",
            CommandKind::PackageInventory => "package_inventory",
            CommandKind::SocketTable => "socket_table",
        }
    }
}

/// Terminal state of a dispatched command. Set exactly once, by whichever
/// of response arrival or timeout expiry happens first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Succeeded { output: String },
    Failed { error: String },
    TimedOut,
    /// The agent's link dropped while the command was pending.
    AgentWentOffline,
}

impl CommandOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Succeeded { .. } => "succeeded",
            CommandOutcome::Failed { .. } => "failed",
            CommandOutcome::TimedOut => "timed_out",
            CommandOutcome::AgentWentOffline => "agent_offline",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded { .. })
    }
}

/// Audit row for one dispatched command, written when it reaches a
/// terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub correlation_id: Uuid,
    pub agent_id: AgentId,
    pub command: CommandKind,
    pub issued_by: Principal,
    pub issued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: CommandOutcome,
}

/// The authenticated caller on whose behalf a command was issued. Supplied
/// by the external auth layer; carried here for audit only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Principal {
    pub fn operator(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Internal subsystems (the scheduler) act as a named system principal.
    pub fn system(subsystem: &str) -> Self {
        Self(format!("system:{subsystem}"))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Scheduled tasks
// ---------------------------------------------------------------------------

/// An operator-defined recurring job. Created and edited through the
/// external task CRUD surface; the scheduler only reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub command: CommandKind,
    /// 5-field cron expression; mutually exclusive with `interval_seconds`.
    pub cron_expr: Option<String>,
    /// Fixed interval in seconds; mutually exclusive with `cron_expr`.
    pub interval_seconds: Option<u64>,
    pub agent_id: AgentId,
    pub enabled: bool,
    pub created_by: Principal,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Append-only record of one firing of a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub agent_id: AgentId,
    pub fired_at: DateTime<Utc>,
    /// Terminal outcome label (`succeeded`, `failed`, `timed_out`,
    /// `agent_offline`, or `dispatch_error`).
    pub outcome: String,
    /// Command output on success, error detail otherwise.
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_serde_tags() {
        let json = serde_json::to_value(CommandKind::Shell {
            command: "uname -a".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "shell");
        assert_eq!(json["command"], "uname -a");

        let json = serde_json::to_value(CommandKind::PackageInventory).unwrap();
        assert_eq!(json["kind"], "package_inventory");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(CommandOutcome::TimedOut.label(), "timed_out");
        assert!(CommandOutcome::Succeeded {
            output: String::new()
        }
        .is_success());
        assert!(!CommandOutcome::AgentWentOffline.is_success());
    }

    #[test]
    fn principal_forms() {
        assert_eq!(Principal::system("scheduler").0, "system:scheduler");
        assert_eq!(Principal::operator("alice").to_string(), "alice");
    }

    #[test]
    fn agent_id_display_matches_inner() {
        let id = AgentId::new("host-01");
        assert_eq!(id.to_string(), "host-01");
        assert_eq!(id.as_str(), "host-01");
    }
}
