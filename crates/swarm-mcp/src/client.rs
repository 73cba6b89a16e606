//! Minimal MCP client over stdio, used by the OpenAI backend to resolve tool
//! calls against peer servers.
//!
//! One client owns one co-process. Requests are strictly sequential: write a
//! line, then read lines until the response with the matching id arrives.
//! Server-initiated notifications are skipped. No timeout is imposed; a peer
//! that never answers hangs its caller by design.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::protocol::{self, JsonRpcRequest, JsonRpcResponse};

/// A tool advertised by a peer server.
#[derive(Debug, Clone)]
pub struct PeerTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug)]
pub struct StdioMcpClient {
    pub name: String,
    child: Child,
    stdin: ChildStdin,
    reader: Lines<BufReader<ChildStdout>>,
    next_id: i64,
}

impl StdioMcpClient {
    /// Spawn the peer process and run the MCP initialize handshake.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn MCP peer '{name}' ({command})"))?;
        let stdin = child.stdin.take().context("peer stdin unavailable")?;
        let stdout = child.stdout.take().context("peer stdout unavailable")?;

        let mut client = Self {
            name: name.to_string(),
            child,
            stdin,
            reader: BufReader::new(stdout).lines(),
            next_id: 0,
        };

        client
            .request(
                "initialize",
                json!({
                    "protocolVersion": protocol::MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "claude-swarm",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await
            .with_context(|| format!("MCP initialize failed for peer '{name}'"))?;
        client
            .notify("notifications/initialized", json!({}))
            .await?;

        debug!(peer = name, "MCP peer connected");
        Ok(client)
    }

    /// Enumerate the peer's tools.
    pub async fn list_tools(&mut self) -> Result<Vec<PeerTool>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .iter()
            .filter_map(|tool| {
                Some(PeerTool {
                    name: tool.get("name")?.as_str()?.to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                })
            })
            .collect())
    }

    /// Invoke one tool and return its joined text content. A result flagged
    /// `isError` becomes an `Err` so the caller surfaces it as a tool failure.
    pub async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<String> {
        let result = self
            .request(
                "tools/call",
                json!({"name": tool, "arguments": arguments}),
            )
            .await?;
        let text = protocol::content_text(&result);
        if protocol::is_error_result(&result) {
            bail!("tool '{tool}' on peer '{}' failed: {text}", self.name);
        }
        Ok(text)
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;

        loop {
            let Some(line) = self.reader.next_line().await? else {
                bail!("MCP peer '{}' closed its stream during '{method}'", self.name);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                warn!(peer = %self.name, line = trimmed, "skipping unparseable line from peer");
                continue;
            };
            if response.id != Some(json!(id)) {
                // Notification or out-of-band message.
                continue;
            }
            if let Some(error) = response.error {
                bail!(
                    "MCP peer '{}' returned error {} for '{method}': {}",
                    self.name,
                    error.code,
                    error.message
                );
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.write_message(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn write_message(&mut self, message: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to write to MCP peer '{}'", self.name))?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Close the peer's stdin and reap the process.
    pub async fn shutdown(mut self) {
        drop(self.stdin);
        match self.child.wait().await {
            Ok(status) => debug!(peer = %self.name, %status, "MCP peer exited"),
            Err(e) => warn!(peer = %self.name, error = %e, "failed to reap MCP peer"),
        }
    }
}
