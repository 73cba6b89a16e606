//! Provider-polymorphic agent execution.
//!
//! One executor runs one sub-agent for one task at a time. The fixed set of
//! providers is a closed enum rather than a trait object; the MCP server
//! facade owns exactly one executor for the lifetime of its process.

pub mod claude;
pub mod openai;

use std::path::Path;

use swarm_core::SwarmError;

pub use claude::{ClaudeAgent, ClaudeAgentConfig, interactive_root_args};
pub use openai::{OpenaiAgent, OpenaiAgentConfig};

/// Options for a single `task` invocation.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Start a fresh provider conversation even when a session id is known.
    pub new_session: bool,
    /// Extra system prompt appended for this call only.
    pub system_prompt: Option<String>,
}

/// Result of one sub-agent run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// User-visible text from the terminal result event.
    pub result: String,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    /// Provider conversation id, when the provider reports one.
    pub session_id: Option<String>,
    pub is_error: bool,
}

#[derive(Debug)]
pub enum AgentExecutor {
    Claude(ClaudeAgent),
    Openai(OpenaiAgent),
}

impl AgentExecutor {
    pub async fn execute(
        &mut self,
        prompt: &str,
        options: &TaskOptions,
    ) -> Result<TaskOutcome, SwarmError> {
        match self {
            Self::Claude(agent) => agent.execute(prompt, options).await,
            Self::Openai(agent) => agent.execute(prompt, options).await,
        }
    }

    /// Forget the captured provider session; the next task starts fresh.
    pub fn reset_session(&mut self) {
        match self {
            Self::Claude(agent) => agent.reset_session(),
            Self::Openai(agent) => agent.reset_session(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Claude(agent) => agent.session_id(),
            Self::Openai(agent) => agent.session_id(),
        }
    }

    pub fn working_directory(&self) -> &Path {
        match self {
            Self::Claude(agent) => agent.working_directory(),
            Self::Openai(agent) => agent.working_directory(),
        }
    }
}
