//! MCP server facade: exposes one instance's tool surface (`task`,
//! `session_info`, `reset_session`) over JSON-RPC 2.0 on stdio.
//!
//! The server is single-threaded per instance; `task` suspends the request
//! for the entire sub-agent run. Tool failures are returned as `isError`
//! content so the calling agent can reason about them, never as protocol
//! errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use swarm_executor::{AgentExecutor, TaskOptions};
use swarm_mcp::protocol::{
    self, JsonRpcRequest, JsonRpcResponse, McpToolDef, error_content, text_content,
};
use swarm_session::SessionLogger;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

pub struct ServerContext {
    pub instance_name: String,
    pub description: String,
    pub executor: AgentExecutor,
    pub logger: Arc<SessionLogger>,
}

pub async fn run_mcp_server(mut context: ServerContext) -> Result<()> {
    info!(instance = %context.instance_name, "starting MCP server on stdio");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!(line = trimmed, "received");

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "failed to parse JSON-RPC request");
                let response = JsonRpcResponse::failure(
                    None,
                    protocol::PARSE_ERROR,
                    format!("Parse error: {e}"),
                );
                write_response(&mut stdout, &response).await?;
                continue;
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "notification");
            continue;
        }

        let response = handle_request(&mut context, request).await;
        write_response(&mut stdout, &response).await?;
    }

    info!(instance = %context.instance_name, "MCP server shutting down");
    if let AgentExecutor::Openai(agent) = &mut context.executor {
        agent.shutdown_peers().await;
    }
    Ok(())
}

async fn handle_request(context: &mut ServerContext, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": protocol::MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "claude-swarm",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({"tools": tool_defs(context)})),
        "tools/call" => match handle_tool_call(context, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::failure(id, protocol::INVALID_PARAMS, e.to_string()),
        },
        other => JsonRpcResponse::failure(
            id,
            protocol::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

fn tool_defs(context: &ServerContext) -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "task".to_string(),
            description: format!(
                "Execute a task using Agent {}. {}",
                context.instance_name, context.description
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The task or question for the agent"
                    },
                    "new_session": {
                        "type": "boolean",
                        "description": "Start a fresh session instead of resuming"
                    },
                    "system_prompt": {
                        "type": "string",
                        "description": "Additional system prompt for this call only"
                    }
                },
                "required": ["prompt"]
            }),
            annotations: Some(json!({
                "readOnlyHint": true,
                "destructiveHint": false,
                "openWorldHint": false,
            })),
        },
        McpToolDef {
            name: "session_info".to_string(),
            description: "Get the current session state of this agent".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            annotations: None,
        },
        McpToolDef {
            name: "reset_session".to_string(),
            description: "Clear this agent's session; the next task starts fresh".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            annotations: None,
        },
    ]
}

async fn handle_tool_call(context: &mut ServerContext, params: Option<Value>) -> Result<Value> {
    let params = params.context("Missing params for tools/call")?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .context("Missing tool name")?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "task" => Ok(handle_task(context, arguments).await),
        "session_info" => Ok(handle_session_info(context)),
        "reset_session" => Ok(handle_reset_session(context)),
        other => anyhow::bail!("Unknown tool: {other}"),
    }
}

async fn handle_task(context: &mut ServerContext, arguments: Value) -> Value {
    let Some(prompt) = arguments.get("prompt").and_then(Value::as_str) else {
        return error_content("Missing required argument: prompt");
    };
    let options = TaskOptions {
        new_session: arguments
            .get("new_session")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        system_prompt: arguments
            .get("system_prompt")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    context.logger.log_request(prompt);
    match context.executor.execute(prompt, &options).await {
        Ok(outcome) if outcome.is_error => error_content(&outcome.result),
        Ok(outcome) => text_content(&outcome.result),
        Err(e) => error_content(&e.to_string()),
    }
}

fn handle_session_info(context: &ServerContext) -> Value {
    let info = json!({
        "has_session": context.executor.session_id().is_some(),
        "session_id": context.executor.session_id(),
        "working_directory": context.executor.working_directory(),
    });
    text_content(&info.to_string())
}

fn handle_reset_session(context: &mut ServerContext) -> Value {
    context.executor.reset_session();
    text_content(
        &json!({"success": true, "message": "Session has been reset"}).to_string(),
    )
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> Result<()> {
    let mut line = serde_json::to_vec(response).context("failed to serialize response")?;
    line.push(b'\n');
    stdout
        .write_all(&line)
        .await
        .context("failed to write response to stdout")?;
    stdout.flush().await.context("failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
#[path = "mcp_server_tests.rs"]
mod tests;
