//! Error types for the fleet runtime.

use thiserror::Error;

use hivewarden_core::types::AgentId;

#[derive(Debug, Error)]
pub enum FleetError {
    /// The agent has no live connection. Dispatch fails fast with this;
    /// no pending command is created.
    #[error("agent {0} has no live connection")]
    AgentOffline(AgentId),

    /// The agent has never completed a handshake with this server.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// The connection's writer task is gone; the message was not queued.
    #[error("agent link closed")]
    LinkClosed,

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
