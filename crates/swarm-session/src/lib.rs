//! Session layout, state records, structured session logging, and cost
//! aggregation.
//!
//! Every process in a swarm (orchestrator and re-entrant MCP servers alike)
//! locates the same session directory through [`paths::SessionPaths`] and the
//! `CLAUDE_SWARM_SESSION_PATH` environment variable, then appends to the
//! shared logs and state records under it.

pub mod cost;
pub mod logger;
pub mod metadata;
pub mod paths;
pub mod state;

pub use logger::SessionLogger;
pub use paths::SessionPaths;
pub use state::InstanceState;
