//! Bootstrap for the re-entrant `mcp-serve` mode: rebuild the server context
//! from parsed CLI arguments and the session published in the environment.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use swarm_config::ApiVersion;
use swarm_executor::{
    AgentExecutor, ClaudeAgent, ClaudeAgentConfig, OpenaiAgent, OpenaiAgentConfig,
};
use swarm_session::{SessionLogger, SessionPaths};

use crate::cli::McpServeArgs;
use crate::mcp_server::{ServerContext, run_mcp_server};

pub async fn handle_mcp_serve(args: McpServeArgs) -> Result<()> {
    let session = SessionPaths::from_env().with_context(|| {
        format!(
            "mcp-serve requires {} to point at an active session",
            swarm_session::paths::SESSION_PATH_ENV
        )
    })?;

    let instance_id = args
        .instance_id
        .clone()
        .unwrap_or_else(|| swarm_core::ids::instance_id(&args.name));
    let logger = Arc::new(SessionLogger::new(
        &session,
        &args.name,
        &instance_id,
        Some(&args.calling_instance),
        args.calling_instance_id.as_deref(),
    )?);

    let executor = build_executor(&args, &instance_id, &session, logger.clone())?;
    let description = args.description.clone().unwrap_or_default();

    run_mcp_server(ServerContext {
        instance_name: args.name,
        description,
        executor,
        logger,
    })
    .await
}

fn build_executor(
    args: &McpServeArgs,
    instance_id: &str,
    session: &SessionPaths,
    logger: Arc<SessionLogger>,
) -> Result<AgentExecutor> {
    match args.provider.as_str() {
        "claude" => Ok(AgentExecutor::Claude(ClaudeAgent::new(
            ClaudeAgentConfig {
                instance_name: args.name.clone(),
                instance_id: instance_id.to_string(),
                directory: args.directory.clone(),
                extra_directories: args.add_dir.clone(),
                model: args.model.clone(),
                prompt: args.prompt.clone(),
                allowed_tools: split_csv(args.allowed_tools.as_deref()),
                disallowed_tools: split_csv(args.disallowed_tools.as_deref()),
                vibe: args.vibe,
                mcp_config_path: args.mcp_config_path.clone(),
                binary: ClaudeAgentConfig::DEFAULT_BINARY.to_string(),
            },
            session.state_dir(),
            logger,
            args.claude_session_id.clone(),
        ))),
        "openai" => {
            let api_key = std::env::var(&args.openai_token_env).unwrap_or_default();
            if api_key.trim().is_empty() {
                bail!(
                    "Environment variable '{}' is not set. OpenAI provider instances require an API key.",
                    args.openai_token_env
                );
            }
            let api_version = match args.api_version.as_str() {
                "chat_completion" => ApiVersion::ChatCompletion,
                "responses" => ApiVersion::Responses,
                other => bail!("Unknown api_version '{other}'"),
            };
            Ok(AgentExecutor::Openai(OpenaiAgent::new(
                OpenaiAgentConfig {
                    instance_name: args.name.clone(),
                    instance_id: instance_id.to_string(),
                    directory: args.directory.clone(),
                    model: args.model.clone(),
                    prompt: args.prompt.clone(),
                    temperature: args.temperature,
                    api_version,
                    base_url: args.base_url.clone(),
                    mcp_config_path: args.mcp_config_path.clone(),
                },
                api_key,
                logger,
            )))
        }
        other => bail!("Unknown provider '{other}'"),
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|csv| {
        csv.split(',')
            .map(str::trim)
            .filter(|tool| !tool.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv(Some("Read,Edit,mcp__backend")), ["Read", "Edit", "mcp__backend"]);
        assert_eq!(split_csv(Some(" Read , Edit ")), ["Read", "Edit"]);
        assert!(split_csv(Some("")).is_empty());
        assert!(split_csv(None).is_empty());
    }
}
