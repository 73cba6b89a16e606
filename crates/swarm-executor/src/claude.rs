//! Claude CLI backend: builds the non-interactive argument vector, spawns the
//! process, and folds its line-delimited JSON stream into a task outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use swarm_core::SwarmError;
use swarm_session::state::{self, InstanceState};
use swarm_session::SessionLogger;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::{TaskOptions, TaskOutcome};

#[derive(Debug, Clone)]
pub struct ClaudeAgentConfig {
    pub instance_name: String,
    pub instance_id: String,
    pub directory: PathBuf,
    pub extra_directories: Vec<PathBuf>,
    pub model: String,
    /// Instance-level system prompt appended to every invocation.
    pub prompt: Option<String>,
    /// Already expanded: declared tools plus `mcp__<peer>` per connection.
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub vibe: bool,
    pub mcp_config_path: PathBuf,
    /// Agent CLI binary; overridable for tests.
    pub binary: String,
}

impl ClaudeAgentConfig {
    pub const DEFAULT_BINARY: &'static str = "claude";
}

#[derive(Debug)]
pub struct ClaudeAgent {
    config: ClaudeAgentConfig,
    state_dir: PathBuf,
    logger: Arc<SessionLogger>,
    session_id: Option<String>,
}

impl ClaudeAgent {
    pub fn new(
        config: ClaudeAgentConfig,
        state_dir: PathBuf,
        logger: Arc<SessionLogger>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            config,
            state_dir,
            logger,
            session_id,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn working_directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn reset_session(&mut self) {
        self.session_id = None;
        self.persist_state("reset");
    }

    /// Argument vector for one non-interactive run.
    pub fn build_args(&self, prompt: &str, options: &TaskOptions) -> Vec<String> {
        let mut args = common_args(&self.config);

        if let Some(session_id) = &self.session_id {
            if !options.new_session {
                args.push("--resume".to_string());
                args.push(session_id.clone());
            }
        }
        if let Some(extra) = &options.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(extra.clone());
        }

        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
        args.push("--verbose".to_string());
        args.push("--print".to_string());
        args.push(prompt.to_string());
        args
    }

    pub async fn execute(
        &mut self,
        prompt: &str,
        options: &TaskOptions,
    ) -> Result<TaskOutcome, SwarmError> {
        let args = self.build_args(prompt, options);
        debug!(instance = %self.config.instance_name, "spawning agent CLI");

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.args(&args);
        cmd.current_dir(&self.config.directory);
        let mut child = swarm_process::spawn_agent(cmd)
            .await
            .map_err(|e| SwarmError::Execution(format!("{e:#}")))?;

        // Drain stderr concurrently so a chatty agent cannot deadlock us.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwarmError::Execution("agent stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut result_event: Option<Value> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| SwarmError::Execution(format!("failed reading agent stream: {e}")))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: Value = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(e) => {
                    if result_event.is_none() {
                        warn!(instance = %self.config.instance_name, error = %e, "skipping malformed stream line");
                    }
                    continue;
                }
            };
            self.handle_event(&event, &mut result_event);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SwarmError::Execution(format!("failed waiting for agent: {e}")))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(SwarmError::Execution(format!(
                "agent exited with {}: {}",
                status,
                stderr_output.trim()
            )));
        }

        let event = result_event.ok_or(SwarmError::Parse)?;
        Ok(outcome_from_result(&event))
    }

    fn handle_event(&mut self, event: &Value, result_event: &mut Option<Value>) {
        match event.get("type").and_then(Value::as_str) {
            Some("system") => {
                if event.get("subtype").and_then(Value::as_str) == Some("init") {
                    if let Some(session_id) = event.get("session_id").and_then(Value::as_str) {
                        self.session_id = Some(session_id.to_string());
                        self.persist_state("active");
                    }
                }
                self.logger.log_stream_event(event);
            }
            Some("result") => {
                self.logger.log_response(event);
                *result_event = Some(event.clone());
            }
            _ => self.logger.log_stream_event(event),
        }
    }

    fn persist_state(&self, status: &str) {
        let mut record = InstanceState::new(
            &self.config.instance_name,
            &self.config.instance_id,
            status,
        );
        record.claude_session_id = self.session_id.clone();
        if let Err(e) = state::save_state(&self.state_dir, &record) {
            warn!(instance = %self.config.instance_name, error = %e, "failed to persist state record");
        }
    }
}

/// Flags shared by the non-interactive executor and the interactive root.
fn common_args(config: &ClaudeAgentConfig) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        config.model.clone(),
        "--mcp-config".to_string(),
        config.mcp_config_path.to_string_lossy().into_owned(),
    ];
    if config.vibe {
        args.push("--dangerously-skip-permissions".to_string());
    } else {
        if !config.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(config.allowed_tools.join(","));
        }
        if !config.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(config.disallowed_tools.join(","));
        }
    }
    if let Some(prompt) = &config.prompt {
        args.push("--append-system-prompt".to_string());
        args.push(prompt.clone());
    }
    for dir in &config.extra_directories {
        args.push("--add-dir".to_string());
        args.push(dir.to_string_lossy().into_owned());
    }
    args
}

/// Argument vector for the root agent, which runs attached to the user's
/// terminal. `prompt` switches it into non-interactive mode.
pub fn interactive_root_args(
    config: &ClaudeAgentConfig,
    resume_session_id: Option<&str>,
    prompt: Option<&str>,
) -> Vec<String> {
    let mut args = common_args(config);
    if let Some(session_id) = resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }
    if let Some(prompt) = prompt {
        args.push("-p".to_string());
        args.push(prompt.to_string());
    }
    args
}

fn outcome_from_result(event: &Value) -> TaskOutcome {
    TaskOutcome {
        result: event
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        cost_usd: event.get("total_cost_usd").and_then(Value::as_f64),
        duration_ms: event.get("duration_ms").and_then(Value::as_u64),
        session_id: event
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_error: event
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
