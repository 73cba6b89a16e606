//! MCP wiring generation: one configuration document per instance, encoding
//! every outbound edge as a re-entrant `mcp-serve` server entry plus the
//! instance's externally declared peers.

use std::collections::HashMap;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use swarm_config::{Instance, McpType, Provider, SwarmConfig};
use swarm_session::SessionPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerEntry {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
    },
}

/// The per-instance wiring document written to `<session>/<name>.mcp.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiringFile {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: IndexMap<String, McpServerEntry>,
    pub instance_name: String,
    pub instance_id: String,
}

impl WiringFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read wiring file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid wiring file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write wiring file {}", path.display()))
    }
}

/// Write one wiring file per instance.
///
/// `instance_ids` maps every instance name to its session-scoped id;
/// `saved_session_ids` carries provider session ids recovered from state
/// records on restore, so callees resume instead of starting fresh.
pub fn generate_wiring(
    config: &SwarmConfig,
    session: &SessionPaths,
    instance_ids: &IndexMap<String, String>,
    saved_session_ids: &HashMap<String, String>,
    binary: &str,
) -> Result<()> {
    for (name, instance) in &config.instances {
        let wiring = build_wiring(config, session, instance, instance_ids, saved_session_ids, binary);
        wiring.save(&session.wiring_path(name))?;
    }
    Ok(())
}

fn build_wiring(
    config: &SwarmConfig,
    session: &SessionPaths,
    caller: &Instance,
    instance_ids: &IndexMap<String, String>,
    saved_session_ids: &HashMap<String, String>,
    binary: &str,
) -> WiringFile {
    let caller_id = instance_ids[caller.name.as_str()].clone();
    let mut mcp_servers = IndexMap::new();

    for connection in &caller.connections {
        let callee = &config.instances[connection.as_str()];
        let callee_id = &instance_ids[connection.as_str()];
        mcp_servers.insert(
            connection.clone(),
            McpServerEntry::Stdio {
                command: binary.to_string(),
                args: mcp_serve_args(
                    callee,
                    callee_id,
                    &caller.name,
                    &caller_id,
                    session,
                    saved_session_ids.get(connection.as_str()).map(String::as_str),
                ),
                env: HashMap::new(),
            },
        );
    }

    for peer in &caller.mcps {
        let entry = match peer.kind {
            McpType::Stdio => McpServerEntry::Stdio {
                // Validated at load time: stdio peers always carry a command.
                command: peer.command.clone().unwrap_or_default(),
                args: peer.args.clone(),
                env: peer.env.clone(),
            },
            McpType::Sse => McpServerEntry::Sse {
                url: peer.url.clone().unwrap_or_default(),
            },
        };
        mcp_servers.insert(peer.name.clone(), entry);
    }

    WiringFile {
        mcp_servers,
        instance_name: caller.name.clone(),
        instance_id: caller_id,
    }
}

/// The re-entrant `mcp-serve` argument vector for one outbound edge.
pub fn mcp_serve_args(
    callee: &Instance,
    callee_id: &str,
    caller_name: &str,
    caller_id: &str,
    session: &SessionPaths,
    claude_session_id: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "mcp-serve".to_string(),
        "--name".to_string(),
        callee.name.clone(),
        "--directory".to_string(),
        callee.directory().to_string_lossy().into_owned(),
    ];
    for dir in callee.extra_directories() {
        args.push("--add-dir".to_string());
        args.push(dir.to_string_lossy().into_owned());
    }
    args.push("--model".to_string());
    args.push(callee.model.clone());
    if let Some(prompt) = &callee.prompt {
        args.push("--prompt".to_string());
        args.push(prompt.clone());
    }
    args.push("--description".to_string());
    args.push(callee.description.clone());
    // Vibe mode skips permission prompts entirely, so no allow-list is wired.
    if !callee.vibe {
        let allowed = callee.expanded_allowed_tools();
        if !allowed.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(allowed.join(","));
        }
        if !callee.disallowed_tools.is_empty() {
            args.push("--disallowed-tools".to_string());
            args.push(callee.disallowed_tools.join(","));
        }
    }
    args.push("--mcp-config-path".to_string());
    args.push(session.wiring_path(&callee.name).to_string_lossy().into_owned());
    args.push("--calling-instance".to_string());
    args.push(caller_name.to_string());
    args.push("--calling-instance-id".to_string());
    args.push(caller_id.to_string());
    args.push("--instance-id".to_string());
    args.push(callee_id.to_string());
    if let Some(session_id) = claude_session_id {
        args.push("--claude-session-id".to_string());
        args.push(session_id.to_string());
    }
    if let Some(openai) = &callee.openai {
        args.push("--provider".to_string());
        args.push(Provider::Openai.as_str().to_string());
        args.push("--temperature".to_string());
        args.push(openai.temperature.to_string());
        args.push("--api-version".to_string());
        args.push(
            match openai.api_version {
                swarm_config::ApiVersion::ChatCompletion => "chat_completion",
                swarm_config::ApiVersion::Responses => "responses",
            }
            .to_string(),
        );
        args.push("--openai-token-env".to_string());
        args.push(openai.token_env.clone());
        if let Some(base_url) = &openai.base_url {
            args.push("--base-url".to_string());
            args.push(base_url.clone());
        }
    }
    if callee.vibe {
        args.push("--vibe".to_string());
    }
    args
}

#[cfg(test)]
#[path = "wiring_tests.rs"]
mod tests;
