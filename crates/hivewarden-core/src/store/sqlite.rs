//! SQLite-backed store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{CommandAudit, Result, ScanKind, ScanStore, StoreError, StoredScan, TaskStore};
use crate::types::{AgentId, CommandRecord, Principal, ScheduledTask, TaskRun};

/// All Hivewarden server state that must survive restarts: scheduled tasks,
/// their run history, the latest scan results per agent, and the command
/// audit log. A single connection behind a mutex is plenty at fleet scale;
/// every statement is its own transaction.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    command          TEXT NOT NULL,
    cron_expr        TEXT,
    interval_seconds INTEGER,
    agent_id         TEXT NOT NULL,
    enabled          INTEGER NOT NULL DEFAULT 1,
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    last_fired_at    TEXT,
    run_count        INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS task_runs (
    id       TEXT PRIMARY KEY,
    task_id  TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    fired_at TEXT NOT NULL,
    outcome  TEXT NOT NULL,
    detail   TEXT
);
CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs (task_id, fired_at);
CREATE TABLE IF NOT EXISTS scan_results (
    agent_id     TEXT NOT NULL,
    kind         TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    result       TEXT NOT NULL,
    PRIMARY KEY (agent_id, kind)
);
CREATE TABLE IF NOT EXISTS command_log (
    correlation_id TEXT PRIMARY KEY,
    agent_id       TEXT NOT NULL,
    command        TEXT NOT NULL,
    issued_by      TEXT NOT NULL,
    issued_at      TEXT NOT NULL,
    completed_at   TEXT NOT NULL,
    outcome        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_command_log_agent ON command_log (agent_id, issued_at);
";

impl SqliteStore {
    /// Open (and create if necessary) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory store with the same schema, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a prior panic mid-statement; propagating the
        // panic is the only sound option here.
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

/// Raw task row; JSON and timestamp columns are decoded outside rusqlite's
/// error type.
struct TaskRow {
    id: String,
    name: String,
    command: String,
    cron_expr: Option<String>,
    interval_seconds: Option<i64>,
    agent_id: String,
    enabled: i64,
    created_by: String,
    created_at: String,
    last_fired_at: Option<String>,
    run_count: i64,
}

fn read_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get("id")?,
        name: row.get("name")?,
        command: row.get("command")?,
        cron_expr: row.get("cron_expr")?,
        interval_seconds: row.get("interval_seconds")?,
        agent_id: row.get("agent_id")?,
        enabled: row.get("enabled")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        last_fired_at: row.get("last_fired_at")?,
        run_count: row.get("run_count")?,
    })
}

impl TaskRow {
    fn into_task(self) -> Result<ScheduledTask> {
        Ok(ScheduledTask {
            command: serde_json::from_str(&self.command)?,
            created_at: parse_ts(&self.created_at)?,
            last_fired_at: self.last_fired_at.as_deref().map(parse_ts).transpose()?,
            id: self.id,
            name: self.name,
            cron_expr: self.cron_expr,
            interval_seconds: self.interval_seconds.map(|v| v as u64),
            agent_id: AgentId::new(self.agent_id),
            enabled: self.enabled != 0,
            created_by: Principal(self.created_by),
            run_count: self.run_count as u64,
        })
    }
}

impl TaskStore for SqliteStore {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT id, name, command, cron_expr, interval_seconds, agent_id, enabled,
                    created_by, created_at, last_fired_at, run_count
             FROM scheduled_tasks WHERE enabled = 1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], read_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn insert_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT OR REPLACE INTO scheduled_tasks
             (id, name, command, cron_expr, interval_seconds, agent_id, enabled,
              created_by, created_at, last_fired_at, run_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.id,
                task.name,
                serde_json::to_string(&task.command)?,
                task.cron_expr,
                task.interval_seconds.map(|v| v as i64),
                task.agent_id.as_str(),
                task.enabled as i64,
                task.created_by.0,
                task.created_at.to_rfc3339(),
                task.last_fired_at.map(|t| t.to_rfc3339()),
                task.run_count as i64,
            ],
        )?;
        Ok(())
    }

    fn mark_fired(&self, task_id: &str, fired_at: DateTime<Utc>) -> Result<()> {
        let db = self.lock();
        db.execute(
            "UPDATE scheduled_tasks
             SET last_fired_at = ?1, run_count = run_count + 1 WHERE id = ?2",
            params![fired_at.to_rfc3339(), task_id],
        )?;
        Ok(())
    }

    fn record_run(&self, run: &TaskRun) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO task_runs (id, task_id, agent_id, fired_at, outcome, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.id,
                run.task_id,
                run.agent_id.as_str(),
                run.fired_at.to_rfc3339(),
                run.outcome,
                run.detail,
            ],
        )?;
        Ok(())
    }

    fn runs_for_task(&self, task_id: &str, limit: usize) -> Result<Vec<TaskRun>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT id, task_id, agent_id, fired_at, outcome, detail
             FROM task_runs WHERE task_id = ?1 ORDER BY fired_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("task_id")?,
                    row.get::<_, String>("agent_id")?,
                    row.get::<_, String>("fired_at")?,
                    row.get::<_, String>("outcome")?,
                    row.get::<_, Option<String>>("detail")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut runs = Vec::with_capacity(rows.len());
        for (id, task_id, agent_id, fired_at, outcome, detail) in rows {
            runs.push(TaskRun {
                id,
                task_id,
                agent_id: AgentId::new(agent_id),
                fired_at: parse_ts(&fired_at)?,
                outcome,
                detail,
            });
        }
        Ok(runs)
    }
}

impl ScanStore for SqliteStore {
    fn save_scan(&self, scan: &StoredScan) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT OR REPLACE INTO scan_results (agent_id, kind, completed_at, result)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                scan.agent_id.as_str(),
                scan.kind.as_str(),
                scan.completed_at.to_rfc3339(),
                serde_json::to_string(&scan.result)?,
            ],
        )?;
        Ok(())
    }

    fn latest_scan(&self, agent_id: &AgentId, kind: ScanKind) -> Result<Option<StoredScan>> {
        let db = self.lock();
        let row = db
            .query_row(
                "SELECT completed_at, result FROM scan_results
                 WHERE agent_id = ?1 AND kind = ?2",
                params![agent_id.as_str(), kind.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>("completed_at")?,
                        row.get::<_, String>("result")?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((completed_at, result)) => Ok(Some(StoredScan {
                agent_id: agent_id.clone(),
                kind,
                completed_at: parse_ts(&completed_at)?,
                result: serde_json::from_str(&result)?,
            })),
        }
    }
}

impl CommandAudit for SqliteStore {
    fn record_command(&self, record: &CommandRecord) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT OR REPLACE INTO command_log
             (correlation_id, agent_id, command, issued_by, issued_at, completed_at, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.correlation_id.to_string(),
                record.agent_id.as_str(),
                serde_json::to_string(&record.command)?,
                record.issued_by.0,
                record.issued_at.to_rfc3339(),
                record.completed_at.to_rfc3339(),
                serde_json::to_string(&record.outcome)?,
            ],
        )?;
        Ok(())
    }

    fn recent_commands(&self, agent_id: &AgentId, limit: usize) -> Result<Vec<CommandRecord>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT correlation_id, agent_id, command, issued_by, issued_at, completed_at, outcome
             FROM command_log WHERE agent_id = ?1 ORDER BY issued_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![agent_id.as_str(), limit as i64], |row| {
                Ok([
                    row.get::<_, String>("correlation_id")?,
                    row.get::<_, String>("agent_id")?,
                    row.get::<_, String>("command")?,
                    row.get::<_, String>("issued_by")?,
                    row.get::<_, String>("issued_at")?,
                    row.get::<_, String>("completed_at")?,
                    row.get::<_, String>("outcome")?,
                ])
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for [corr, agent, command, issued_by, issued_at, completed_at, outcome] in rows {
            records.push(CommandRecord {
                correlation_id: corr
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("correlation id {corr}")))?,
                agent_id: AgentId::new(agent),
                command: serde_json::from_str(&command)?,
                issued_by: Principal(issued_by),
                issued_at: parse_ts(&issued_at)?,
                completed_at: parse_ts(&completed_at)?,
                outcome: serde_json::from_str(&outcome)?,
            });
        }
        Ok(records)
    }
}
