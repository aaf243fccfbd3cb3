//! Configuration loading.

pub mod settings;

pub use settings::{CommandSettings, HiveConfig, SchedulerSettings, ScorerSettings};
