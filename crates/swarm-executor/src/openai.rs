//! OpenAI API backend.
//!
//! Holds a cached conversation (message list in `chat_completion` mode, a
//! `previous_response_id` in `responses` mode) and bridges the provider's
//! tool calls onto the instance's MCP peers, which are started as stdio
//! co-processes from the same wiring file the generator emitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use swarm_config::ApiVersion;
use swarm_core::SwarmError;
use swarm_mcp::client::PeerTool;
use swarm_mcp::{McpServerEntry, StdioMcpClient, WiringFile};
use swarm_session::SessionLogger;
use tracing::{debug, warn};

use crate::{TaskOptions, TaskOutcome};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenaiAgentConfig {
    pub instance_name: String,
    pub instance_id: String,
    pub directory: PathBuf,
    pub model: String,
    /// Instance-level system prompt.
    pub prompt: Option<String>,
    pub temperature: f64,
    pub api_version: ApiVersion,
    pub base_url: Option<String>,
    pub mcp_config_path: PathBuf,
}

#[derive(Debug)]
pub struct OpenaiAgent {
    config: OpenaiAgentConfig,
    api_key: String,
    client: reqwest::Client,
    logger: Arc<SessionLogger>,
    /// chat_completion conversation cache.
    messages: Vec<Value>,
    /// responses-mode conversation cache.
    previous_response_id: Option<String>,
    peers: Vec<StdioMcpClient>,
    /// Mangled tool name to (peer index, peer-local tool name).
    tool_index: HashMap<String, (usize, String)>,
    chat_tools: Vec<Value>,
    responses_tools: Vec<Value>,
    peers_connected: bool,
}

impl OpenaiAgent {
    pub fn new(config: OpenaiAgentConfig, api_key: String, logger: Arc<SessionLogger>) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
            logger,
            messages: Vec::new(),
            previous_response_id: None,
            peers: Vec::new(),
            tool_index: HashMap::new(),
            chat_tools: Vec::new(),
            responses_tools: Vec::new(),
            peers_connected: false,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    pub fn working_directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn reset_session(&mut self) {
        self.messages.clear();
        self.previous_response_id = None;
    }

    /// Sorted mangled names of every peer tool.
    pub fn peer_tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tool_index.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start the MCP co-processes listed in the wiring file and enumerate
    /// their tools. Safe to call repeatedly; peers are started once.
    pub async fn connect_peers(&mut self) -> Result<(), SwarmError> {
        if self.peers_connected {
            return Ok(());
        }
        self.peers_connected = true;

        if !self.config.mcp_config_path.exists() {
            debug!(
                path = %self.config.mcp_config_path.display(),
                "no wiring file; agent has no MCP peers"
            );
            return Ok(());
        }
        let wiring = WiringFile::load(&self.config.mcp_config_path)
            .map_err(|e| SwarmError::Transport(format!("{e:#}")))?;

        for (peer_name, entry) in &wiring.mcp_servers {
            match entry {
                McpServerEntry::Stdio { command, args, env } => {
                    let mut client = StdioMcpClient::connect(peer_name, command, args, env)
                        .await
                        .map_err(|e| SwarmError::Transport(format!("{e:#}")))?;
                    let tools = client
                        .list_tools()
                        .await
                        .map_err(|e| SwarmError::Transport(format!("{e:#}")))?;
                    let peer_index = self.peers.len();
                    for tool in tools {
                        let mangled = mangled_tool_name(peer_name, &tool.name);
                        self.chat_tools.push(chat_tool_schema(&mangled, &tool));
                        self.responses_tools
                            .push(responses_tool_schema(&mangled, &tool));
                        self.tool_index
                            .insert(mangled, (peer_index, tool.name.clone()));
                    }
                    self.peers.push(client);
                }
                McpServerEntry::Sse { url } => {
                    warn!(
                        peer = %peer_name,
                        url = %url,
                        "sse peers are not reachable from the OpenAI backend; skipping"
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn execute(
        &mut self,
        prompt: &str,
        options: &TaskOptions,
    ) -> Result<TaskOutcome, SwarmError> {
        if options.new_session {
            self.reset_session();
        }
        self.connect_peers().await?;

        let started = Instant::now();
        let text = match self.config.api_version {
            ApiVersion::ChatCompletion => self.run_chat(prompt, options).await?,
            ApiVersion::Responses => self.run_responses(prompt, options).await?,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result_event = json!({
            "type": "result",
            "result": text,
            "duration_ms": duration_ms,
            "is_error": false,
        });
        self.logger.log_response(&result_event);

        Ok(TaskOutcome {
            result: text,
            cost_usd: None,
            duration_ms: Some(duration_ms),
            session_id: self.previous_response_id.clone(),
            is_error: false,
        })
    }

    async fn run_chat(
        &mut self,
        prompt: &str,
        options: &TaskOptions,
    ) -> Result<String, SwarmError> {
        if self.messages.is_empty() {
            if let Some(system) = &self.config.prompt {
                self.messages.push(json!({"role": "system", "content": system}));
            }
        }
        if let Some(extra) = &options.system_prompt {
            self.messages.push(json!({"role": "system", "content": extra}));
        }
        self.messages.push(json!({"role": "user", "content": prompt}));

        loop {
            let mut body = json!({
                "model": self.config.model,
                "messages": self.messages,
                "temperature": self.config.temperature,
            });
            if !self.chat_tools.is_empty() {
                body["tools"] = Value::Array(self.chat_tools.clone());
            }

            let response = self.post("chat/completions", &body).await?;
            let message = response
                .pointer("/choices/0/message")
                .cloned()
                .ok_or_else(|| {
                    SwarmError::Transport("completion response missing choices[0].message".into())
                })?;
            self.messages.push(message.clone());

            let tool_calls = extract_chat_tool_calls(&message);
            if tool_calls.is_empty() {
                return Ok(message
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string());
            }
            for call in tool_calls {
                let output = self.resolve_tool_call(&call.name, call.arguments).await;
                self.messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output,
                }));
            }
        }
    }

    async fn run_responses(
        &mut self,
        prompt: &str,
        options: &TaskOptions,
    ) -> Result<String, SwarmError> {
        let instructions = match (&self.config.prompt, &options.system_prompt) {
            (Some(base), Some(extra)) => Some(format!("{base}\n\n{extra}")),
            (Some(base), None) => Some(base.clone()),
            (None, Some(extra)) => Some(extra.clone()),
            (None, None) => None,
        };
        let mut input = Value::String(prompt.to_string());

        loop {
            let mut body = json!({
                "model": self.config.model,
                "input": input,
                "temperature": self.config.temperature,
            });
            if let Some(instructions) = &instructions {
                body["instructions"] = json!(instructions);
            }
            if let Some(previous) = &self.previous_response_id {
                body["previous_response_id"] = json!(previous);
            }
            if !self.responses_tools.is_empty() {
                body["tools"] = Value::Array(self.responses_tools.clone());
            }

            let response = self.post("responses", &body).await?;
            if let Some(id) = response.get("id").and_then(Value::as_str) {
                self.previous_response_id = Some(id.to_string());
            }

            let calls = extract_responses_function_calls(&response);
            if calls.is_empty() {
                return Ok(extract_responses_text(&response));
            }
            let mut outputs = Vec::with_capacity(calls.len());
            for call in calls {
                let output = self.resolve_tool_call(&call.name, call.arguments).await;
                outputs.push(json!({
                    "type": "function_call_output",
                    "call_id": call.id,
                    "output": output,
                }));
            }
            input = Value::Array(outputs);
        }
    }

    /// Route one provider tool call to its MCP peer. Failures are folded into
    /// the tool result text so the model can react to them.
    async fn resolve_tool_call(&mut self, mangled: &str, arguments: Value) -> String {
        self.logger.log_stream_event(&json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "name": mangled, "input": arguments},
            ]},
        }));
        let Some((peer_index, tool_name)) = self.tool_index.get(mangled).cloned() else {
            return format!("Error: unknown tool '{mangled}'");
        };
        match self.peers[peer_index].call_tool(&tool_name, arguments).await {
            Ok(text) => text,
            Err(e) => format!("Error: {e:#}"),
        }
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, SwarmError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{base}/{endpoint}");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| SwarmError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SwarmError::Transport(format!("failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(SwarmError::Transport(format!(
                "{url} returned {status}: {text}"
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| SwarmError::Transport(format!("invalid JSON from {url}: {e}")))
    }

    /// Shut down peer co-processes. Called by the facade on exit.
    pub async fn shutdown_peers(&mut self) {
        for peer in self.peers.drain(..) {
            peer.shutdown().await;
        }
        self.tool_index.clear();
        self.chat_tools.clear();
        self.responses_tools.clear();
        self.peers_connected = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

pub(crate) fn mangled_tool_name(peer: &str, tool: &str) -> String {
    format!("mcp__{peer}__{tool}")
}

fn chat_tool_schema(mangled: &str, tool: &PeerTool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": mangled,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    })
}

fn responses_tool_schema(mangled: &str, tool: &PeerTool) -> Value {
    json!({
        "type": "function",
        "name": mangled,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

pub(crate) fn extract_chat_tool_calls(message: &Value) -> Vec<ProviderToolCall> {
    message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id")?.as_str()?.to_string();
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ProviderToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn extract_responses_function_calls(response: &Value) -> Vec<ProviderToolCall> {
    response
        .get("output")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
                .filter_map(|item| {
                    Some(ProviderToolCall {
                        id: item.get("call_id")?.as_str()?.to_string(),
                        name: item.get("name")?.as_str()?.to_string(),
                        arguments: item
                            .get("arguments")
                            .and_then(Value::as_str)
                            .and_then(|raw| serde_json::from_str(raw).ok())
                            .unwrap_or_else(|| json!({})),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn extract_responses_text(response: &Value) -> String {
    response
        .get("output")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter(|block| {
                    block.get("type").and_then(Value::as_str) == Some("output_text")
                })
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "openai_tests.rs"]
mod tests;
