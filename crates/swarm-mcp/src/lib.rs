//! MCP plumbing: wiring generation, JSON-RPC protocol types, and a stdio
//! client for talking to peer servers.

pub mod client;
pub mod protocol;
pub mod wiring;

pub use client::StdioMcpClient;
pub use wiring::{McpServerEntry, WiringFile};
