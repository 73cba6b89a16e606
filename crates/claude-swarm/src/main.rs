use anyhow::Result;
use clap::Parser;

mod cli;
mod mcp_serve_cmd;
mod mcp_server;
mod session_cmds;
mod start_cmd;

use cli::{Cli, Commands, StartArgs};

fn init_tracing(debug: bool, verbose: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // Logs go to stderr: in mcp-serve mode stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Start(StartArgs::default()));

    match command {
        Commands::Start(args) => {
            init_tracing(args.debug, args.verbose);
            let exit_code = start_cmd::handle_start(args).await?;
            std::process::exit(exit_code);
        }
        Commands::McpServe(args) => {
            init_tracing(false, false);
            mcp_serve_cmd::handle_mcp_serve(args).await?;
        }
        Commands::ListSessions => {
            init_tracing(false, false);
            session_cmds::handle_list_sessions()?;
        }
        Commands::Clean { days } => {
            init_tracing(false, false);
            session_cmds::handle_clean(days)?;
        }
        Commands::Version => {
            println!("claude-swarm {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
