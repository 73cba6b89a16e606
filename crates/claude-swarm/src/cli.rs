use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "claude-swarm", version)]
#[command(about = "Launch and supervise a swarm of collaborating AI agents")]
pub struct Cli {
    /// Defaults to `start` when no subcommand is given.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the topology document and launch the swarm
    Start(StartArgs),

    /// Internal re-entrant mode: serve one instance as an MCP server on stdio
    #[command(name = "mcp-serve", hide = true)]
    McpServe(McpServeArgs),

    /// List recorded sessions with their aggregate cost
    ListSessions,

    /// Remove old sessions and stale run symlinks
    Clean {
        /// Remove sessions older than this many days
        #[arg(long, default_value_t = 30)]
        days: u64,
    },

    /// Print the version
    Version,
}

#[derive(Args, Default)]
pub struct StartArgs {
    /// Path to the topology document (defaults to ./claude-swarm.yml)
    #[arg(value_name = "CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Path to the topology document
    #[arg(short, long, value_name = "PATH", conflicts_with = "config_path")]
    pub config: Option<PathBuf>,

    /// Skip permission prompts on every instance
    #[arg(long)]
    pub vibe: bool,

    /// Run non-interactively, seeding the root agent with this prompt
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,

    /// Restore a previous session by id or path
    #[arg(long, value_name = "ID|PATH")]
    pub session_id: Option<String>,

    /// Isolate instances in per-session git worktrees (optional shared name)
    #[arg(short = 'w', long, num_args = 0..=1, value_name = "NAME")]
    pub worktree: Option<Option<String>>,

    /// Verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Mirrors the wiring file's `args` vector (see the wiring generator).
#[derive(Args)]
pub struct McpServeArgs {
    /// Instance name
    #[arg(long)]
    pub name: String,

    /// Primary working directory
    #[arg(long)]
    pub directory: PathBuf,

    /// Additional working directories
    #[arg(long = "add-dir")]
    pub add_dir: Vec<PathBuf>,

    #[arg(long, default_value = "sonnet")]
    pub model: String,

    /// System prompt appended to the agent
    #[arg(long)]
    pub prompt: Option<String>,

    /// Human-readable description, surfaced in the task tool
    #[arg(long)]
    pub description: Option<String>,

    /// Comma-separated allowed tools
    #[arg(long)]
    pub allowed_tools: Option<String>,

    /// Comma-separated disallowed tools
    #[arg(long)]
    pub disallowed_tools: Option<String>,

    /// This instance's own wiring file
    #[arg(long)]
    pub mcp_config_path: PathBuf,

    /// Name of the instance that spawned this server
    #[arg(long)]
    pub calling_instance: String,

    #[arg(long)]
    pub calling_instance_id: Option<String>,

    /// This instance's session-scoped id
    #[arg(long)]
    pub instance_id: Option<String>,

    /// Provider session to resume (restoration path)
    #[arg(long)]
    pub claude_session_id: Option<String>,

    #[arg(long, default_value = "claude")]
    pub provider: String,

    #[arg(long, default_value_t = 0.3)]
    pub temperature: f64,

    #[arg(long, default_value = "chat_completion")]
    pub api_version: String,

    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub openai_token_env: String,

    #[arg(long)]
    pub base_url: Option<String>,

    /// Skip permission prompts
    #[arg(long)]
    pub vibe: bool,
}
