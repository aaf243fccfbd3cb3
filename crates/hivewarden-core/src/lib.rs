//! # hivewarden-core
//!
//! Core type system for Hivewarden -- fleet security monitoring for remote
//! hosts.
//!
//! This crate defines the shared types and contracts used across all
//! Hivewarden components: the agent/command data model, the JSON-lines link
//! protocol spoken between the daemon and its agents, TOML configuration,
//! and the durable-store traits (with SQLite and in-memory implementations)
//! that the scheduler and scan pipelines persist through.

pub mod config;
pub mod protocol;
pub mod store;
pub mod types;

pub use types::{AgentId, CommandKind, CommandOutcome, Principal};
