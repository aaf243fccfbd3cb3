//! Application settings and TOML configuration parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level Hivewarden configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Address the agent link server listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to the SQLite store (tasks, runs, scan results, command audit).
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path to the CVE corpus database.
    #[serde(default = "default_cve_db_path")]
    pub cve_db_path: PathBuf,

    /// Log level used when `HIVEWARDEN_LOG` is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Command dispatch settings.
    #[serde(default)]
    pub command: CommandSettings,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// External anomaly scorer settings.
    #[serde(default)]
    pub scorer: ScorerSettings,
}

/// Command dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Seconds a dispatched command may stay pending before it times out.
    #[serde(default = "default_command_timeout")]
    pub timeout_seconds: u64,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between due-task checks.
    #[serde(default = "default_tick")]
    pub tick_seconds: u64,
}

/// External anomaly scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerSettings {
    /// Base URL of the scorer API.
    #[serde(default = "default_scorer_url")]
    pub base_url: String,

    /// Maximum feature vectors per scoring request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Connections scoring at or above this are flagged as anomalous.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_scorer_timeout")]
    pub timeout_seconds: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7070".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/hivewarden/hivewarden.db")
}

fn default_cve_db_path() -> PathBuf {
    PathBuf::from("/var/lib/hivewarden/cve-corpus.db")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_tick() -> u64 {
    30
}

fn default_scorer_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_flag_threshold() -> f64 {
    0.75
}

fn default_scorer_timeout() -> u64 {
    10
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            db_path: default_db_path(),
            cve_db_path: default_cve_db_path(),
            log_level: None,
            command: CommandSettings::default(),
            scheduler: SchedulerSettings::default(),
            scorer: ScorerSettings::default(),
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_command_timeout(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
        }
    }
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            base_url: default_scorer_url(),
            batch_size: default_batch_size(),
            flag_threshold: default_flag_threshold(),
            timeout_seconds: default_scorer_timeout(),
        }
    }
}

impl HiveConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file: {}", path.display()))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command.timeout_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config: HiveConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7070");
        assert_eq!(config.scheduler.tick_seconds, 30);
        assert_eq!(config.command.timeout_seconds, 30);
        assert_eq!(config.scorer.batch_size, 50);
        assert!((config.scorer.flag_threshold - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_override() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9100"

[scorer]
base_url = "http://scorer.internal:8000"
batch_size = 40
"#;
        let config: HiveConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
        assert_eq!(config.scorer.base_url, "http://scorer.internal:8000");
        assert_eq!(config.scorer.batch_size, 40);
        // untouched sections keep defaults
        assert_eq!(config.scheduler.tick_seconds, 30);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = HiveConfig::load(Path::new("/nonexistent/hivewarden.toml")).unwrap();
        assert_eq!(config.scorer.timeout_seconds, 10);
    }
}
