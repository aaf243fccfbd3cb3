//! # hivewarden-fleet
//!
//! The agent-fleet runtime: who is connected, and what have we asked them
//! to do.
//!
//! [`AgentRegistry`] is the single source of truth for connected agents
//! and their last-known state. [`Correlator`] pairs dispatched commands
//! with their eventual responses by correlation ID, with a single sweep
//! task expiring overdue commands. [`Fleet`] ties the two together behind
//! the dispatch API, and [`link`] hosts the JSON-lines TCP server the
//! agents stay connected to.

pub mod correlator;
pub mod error;
pub mod fleet;
pub mod link;
pub mod registry;

pub use correlator::Correlator;
pub use error::{FleetError, Result};
pub use fleet::Fleet;
pub use link::{run_link_server, AgentReport};
pub use registry::{AgentRegistry, LinkHandle};
