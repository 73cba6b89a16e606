//! Shared error taxonomy and identifiers for the swarm orchestrator.

pub mod error;
pub mod ids;

pub use error::SwarmError;
