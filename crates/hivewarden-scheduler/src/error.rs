//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("malformed cron expression: {0}")]
    Malformed(String),

    #[error("task defines no schedule")]
    Missing,
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
