//! Raw deserialization types for the topology document.
//!
//! These mirror the YAML surface exactly; materialization into validated
//! [`crate::Instance`] values happens in the loader.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct RawDocument {
    #[allow(dead_code)]
    pub version: u64,
    pub swarm: RawSwarm,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSwarm {
    pub name: String,
    pub main: String,
    #[serde(default)]
    pub before: Vec<String>,
    pub instances: IndexMap<String, RawInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawInstance {
    pub description: String,
    #[serde(default)]
    pub directory: Option<OneOrMany>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<RawProvider>,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    /// Accepted alias for `allowed_tools`.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    #[serde(default)]
    pub mcps: Vec<McpPeer>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub vibe: Option<bool>,
    #[serde(default)]
    pub worktree: Option<RawWorktree>,
    // OpenAI-only keys; rejected on Claude instances during validation.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub api_version: Option<RawApiVersion>,
    #[serde(default)]
    pub openai_token_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(dir) => vec![dir],
            Self::Many(dirs) => dirs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RawProvider {
    Claude,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RawApiVersion {
    ChatCompletion,
    Responses,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawWorktree {
    Flag(bool),
    Name(String),
}

/// Externally declared MCP peer, copied verbatim into the wiring file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPeer {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: McpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpType {
    Stdio,
    Sse,
}
