//! Orchestrator lifecycle: validate, allocate the session, run `before`
//! hooks, set up worktrees, generate wiring, launch the root agent in the
//! foreground, and tear everything down on exit or signal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use swarm_config::{SwarmConfig, WorktreeSetting};
use swarm_core::SwarmError;
use swarm_executor::{
    ClaudeAgentConfig, OpenaiAgent, OpenaiAgentConfig, TaskOptions, interactive_root_args,
};
use swarm_process::ProcessTracker;
use swarm_session::metadata::{DirectoryMapping, SessionMetadata, WorktreeMetadata};
use swarm_session::{InstanceState, SessionLogger, SessionPaths, cost, paths, state};
use swarm_worktree::WorktreeManager;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{info, warn};

use crate::cli::StartArgs;

/// Prompt used to seed a non-interactive OpenAI root when the user supplied
/// none of their own.
const ROOT_SEED_PROMPT: &str = "I am ready to start";

pub async fn handle_start(args: StartArgs) -> Result<i32> {
    let home = paths::swarm_home();

    // 1. Parse and validate; 2. choose the session path.
    let launch = match prepare_launch(&args, &home) {
        Ok(launch) => launch,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return Ok(1);
        }
    };
    let Launch {
        mut config,
        session,
        start_dir,
        restore,
    } = launch;

    if args.vibe {
        for instance in config.instances.values_mut() {
            instance.vibe = true;
        }
    }

    session.publish_env(&start_dir);

    // 3. Signal handlers are live before anything long-running starts.
    let mut signals = TermSignals::new()?;

    // 4. `before` commands, initial launch only.
    if !restore {
        if let Err(e) = run_before_commands(&config.before, &mut signals).await {
            eprintln!("Error: {e}");
            return Ok(1);
        }
    }

    // 5. Worktree setup (or restore of the recorded mapping).
    let worktree_manager = match setup_worktrees(&args, &mut config, &session, &start_dir, restore)
    {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return Ok(1);
        }
    };

    // 6. Wiring generation against the final instance configs.
    let (instance_ids, saved_session_ids) = assign_instance_ids(&config, &session)?;
    write_initial_states(&config, &session, &instance_ids, &saved_session_ids);
    let binary = orchestrator_binary();
    swarm_mcp::wiring::generate_wiring(&config, &session, &instance_ids, &saved_session_ids, &binary)?;

    // 7. Run symlink marks the session active.
    paths::create_run_symlink(&session)?;

    // 8. Root agent in the foreground.
    let tracker = ProcessTracker::new(&session.pids_dir())?;
    let exit_code = run_root(
        &config,
        &session,
        &instance_ids,
        &saved_session_ids,
        &args,
        &tracker,
        &mut signals,
    )
    .await
    .unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        1
    });

    // 9. Teardown; the session directory itself is preserved.
    shutdown(&config, &session, &tracker, worktree_manager.as_ref());
    Ok(exit_code)
}

struct Launch {
    config: SwarmConfig,
    session: SessionPaths,
    start_dir: PathBuf,
    restore: bool,
}

fn prepare_launch(args: &StartArgs, home: &Path) -> Result<Launch> {
    if let Some(session_arg) = &args.session_id {
        let session_root = paths::resolve_session_arg(home, session_arg)?;
        let session = SessionPaths::open(home, &session_root)?;

        let start_dir = PathBuf::from(
            std::fs::read_to_string(session.start_directory_path())
                .context("session has no recorded start directory")?
                .trim(),
        );
        std::env::set_current_dir(&start_dir).with_context(|| {
            format!("cannot enter recorded start directory {}", start_dir.display())
        })?;

        let config =
            SwarmConfig::load_with_base_dir(&session.config_copy_path(), &start_dir)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        info!(session = session.session_id(), "restoring session");
        return Ok(Launch {
            config,
            session,
            start_dir,
            restore: true,
        });
    }

    let config_path = args
        .config
        .clone()
        .or_else(|| args.config_path.clone())
        .unwrap_or_else(|| PathBuf::from("claude-swarm.yml"));
    let start_dir = std::env::current_dir()?;
    let config =
        SwarmConfig::load(&config_path).map_err(|e| anyhow::anyhow!("{e}"))?;

    let session = SessionPaths::create(home, &start_dir, &paths::new_session_id())?;
    if let Some(source) = &config.source_path {
        std::fs::copy(source, session.config_copy_path())
            .context("failed to copy topology into session")?;
        std::fs::write(
            session.source_config_path_file(),
            source.to_string_lossy().as_bytes(),
        )?;
    }
    std::fs::write(
        session.start_directory_path(),
        start_dir.to_string_lossy().as_bytes(),
    )?;
    SessionMetadata::new(&config.name, &start_dir, env!("CARGO_PKG_VERSION")).save(&session)?;

    info!(session = session.session_id(), swarm = %config.name, "created session");
    Ok(Launch {
        config,
        session,
        start_dir,
        restore: false,
    })
}

/// Termination signals that trigger cooperative cleanup.
struct TermSignals {
    int: Signal,
    term: Signal,
    quit: Signal,
}

impl TermSignals {
    fn new() -> Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?,
            term: signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?,
            quit: signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.int.recv() => "SIGINT",
            _ = self.term.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

async fn run_before_commands(
    commands: &[String],
    signals: &mut TermSignals,
) -> Result<(), SwarmError> {
    for command in commands {
        info!(command = %command, "running before command");
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|e| SwarmError::BeforeCommand {
                command: command.clone(),
                status: e.raw_os_error().unwrap_or(-1),
            })?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(|_| SwarmError::BeforeCommand {
                command: command.clone(),
                status: -1,
            })?,
            sig = signals.recv() => {
                warn!(signal = sig, "interrupted during before command");
                let _ = child.kill().await;
                return Err(SwarmError::BeforeCommand {
                    command: command.clone(),
                    status: 130,
                });
            }
        };
        if !status.success() {
            return Err(SwarmError::BeforeCommand {
                command: command.clone(),
                status: status.code().unwrap_or(-1),
            });
        }
    }
    Ok(())
}

/// Remap instance directories into worktrees, or re-apply the mapping saved
/// in the session metadata on restore. Returns the manager when worktrees
/// are in play so teardown can reclaim them.
fn setup_worktrees(
    args: &StartArgs,
    config: &mut SwarmConfig,
    session: &SessionPaths,
    start_dir: &Path,
    restore: bool,
) -> Result<Option<WorktreeManager>> {
    if restore {
        return restore_worktrees(config, session);
    }

    let cli_enabled = args.worktree.is_some();
    if !cli_enabled && !config.any_instance_requests_worktree() {
        return Ok(None);
    }

    let mut manager = WorktreeManager::new(&session.worktrees_dir(), session.session_id());
    let shared_name = args
        .worktree
        .clone()
        .flatten()
        .unwrap_or_else(|| manager.default_shared_name());

    let mut worktree_metadata = WorktreeMetadata {
        shared_name: shared_name.clone(),
        instances: HashMap::new(),
    };

    for (name, instance) in config.instances.iter_mut() {
        let worktree_name = match &instance.worktree {
            WorktreeSetting::Disabled => None,
            WorktreeSetting::Named(custom) => Some(custom.clone()),
            WorktreeSetting::Shared => Some(shared_name.clone()),
            WorktreeSetting::Unset => cli_enabled.then(|| shared_name.clone()),
        };
        let Some(worktree_name) = worktree_name else {
            continue;
        };

        let mut mappings = Vec::with_capacity(instance.directories.len());
        let mut mapped_dirs = Vec::with_capacity(instance.directories.len());
        for dir in &instance.directories {
            let mapped = manager.map_directory(dir, &worktree_name)?;
            mappings.push(DirectoryMapping {
                original: dir.clone(),
                mapped: mapped.clone(),
            });
            mapped_dirs.push(mapped);
        }
        instance.directories = mapped_dirs;
        worktree_metadata.instances.insert(name.clone(), mappings);
    }

    let mut metadata = SessionMetadata::load(session)
        .unwrap_or_else(|_| SessionMetadata::new(&config.name, start_dir, env!("CARGO_PKG_VERSION")));
    metadata.worktree = Some(worktree_metadata);
    metadata.save(session)?;

    Ok(Some(manager))
}

fn restore_worktrees(
    config: &mut SwarmConfig,
    session: &SessionPaths,
) -> Result<Option<WorktreeManager>> {
    let Ok(metadata) = SessionMetadata::load(session) else {
        return Ok(None);
    };
    let Some(worktree) = metadata.worktree else {
        return Ok(None);
    };

    let mut manager = WorktreeManager::new(&session.worktrees_dir(), session.session_id());
    for (name, instance) in config.instances.iter_mut() {
        let Some(mappings) = worktree.instances.get(name) else {
            continue;
        };
        instance.directories = mappings.iter().map(|m| m.mapped.clone()).collect();
        for mapping in mappings {
            if let Some(repo_root) = swarm_worktree::git::repo_root(&mapping.original) {
                manager.adopt(&repo_root, &mapping.mapped, &worktree.shared_name);
            }
        }
    }
    Ok(Some(manager))
}

/// Reuse ids (and captured provider sessions) from saved state records,
/// minting fresh ids for instances seen for the first time.
fn assign_instance_ids(
    config: &SwarmConfig,
    session: &SessionPaths,
) -> Result<(IndexMap<String, String>, HashMap<String, String>)> {
    let saved = state::load_all(&session.state_dir())?;
    let mut ids = IndexMap::new();
    let mut sessions = HashMap::new();
    for name in config.instances.keys() {
        match saved.iter().find(|record| record.instance_name == *name) {
            Some(record) => {
                ids.insert(name.clone(), record.instance_id.clone());
                if let Some(session_id) = &record.claude_session_id {
                    sessions.insert(name.clone(), session_id.clone());
                }
            }
            None => {
                ids.insert(name.clone(), swarm_core::ids::instance_id(name));
            }
        }
    }
    Ok((ids, sessions))
}

fn write_initial_states(
    config: &SwarmConfig,
    session: &SessionPaths,
    instance_ids: &IndexMap<String, String>,
    saved_session_ids: &HashMap<String, String>,
) {
    for name in config.instances.keys() {
        let mut record = InstanceState::new(name, &instance_ids[name.as_str()], "pending");
        record.claude_session_id = saved_session_ids.get(name.as_str()).cloned();
        if let Err(e) = state::save_state(&session.state_dir(), &record) {
            warn!(instance = %name, error = %e, "failed to write initial state record");
        }
    }
}

fn orchestrator_binary() -> String {
    std::env::current_exe()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "claude-swarm".to_string())
}

async fn run_root(
    config: &SwarmConfig,
    session: &SessionPaths,
    instance_ids: &IndexMap<String, String>,
    saved_session_ids: &HashMap<String, String>,
    args: &StartArgs,
    tracker: &ProcessTracker,
    signals: &mut TermSignals,
) -> Result<i32> {
    let root = config.main_instance();
    let root_id = instance_ids[config.main.as_str()].clone();

    match root.provider {
        swarm_config::Provider::Claude => {
            run_root_claude(config, session, &root_id, saved_session_ids, args, tracker, signals)
                .await
        }
        swarm_config::Provider::Openai => {
            let logger =
                Arc::new(SessionLogger::new(session, &root.name, &root_id, None, None)?);
            run_root_openai(config, session, &root_id, args, logger, signals).await
        }
    }
}

async fn run_root_claude(
    config: &SwarmConfig,
    session: &SessionPaths,
    root_id: &str,
    saved_session_ids: &HashMap<String, String>,
    args: &StartArgs,
    tracker: &ProcessTracker,
    signals: &mut TermSignals,
) -> Result<i32> {
    let root = config.main_instance();
    let agent_config = ClaudeAgentConfig {
        instance_name: root.name.clone(),
        instance_id: root_id.to_string(),
        directory: root.directory().to_path_buf(),
        extra_directories: root.extra_directories().to_vec(),
        model: root.model.clone(),
        prompt: root.prompt.clone(),
        allowed_tools: root.expanded_allowed_tools(),
        disallowed_tools: root.disallowed_tools.clone(),
        vibe: root.vibe,
        mcp_config_path: session.wiring_path(&root.name),
        binary: ClaudeAgentConfig::DEFAULT_BINARY.to_string(),
    };
    let argv = interactive_root_args(
        &agent_config,
        saved_session_ids.get(config.main.as_str()).map(String::as_str),
        args.prompt.as_deref(),
    );

    which::which(&agent_config.binary).map_err(|_| {
        anyhow::anyhow!(
            "'{}' not found on PATH. Install the Claude CLI first.",
            agent_config.binary
        )
    })?;

    info!(instance = %root.name, "launching root agent");
    let mut cmd = tokio::process::Command::new(&agent_config.binary);
    cmd.args(&argv);
    cmd.current_dir(root.directory());
    cmd.stdin(std::process::Stdio::inherit());
    cmd.stdout(std::process::Stdio::inherit());
    cmd.stderr(std::process::Stdio::inherit());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to launch '{}'", agent_config.binary))?;
    let pid = child.id();
    if let Some(pid) = pid {
        tracker.track(pid, &format!("{} (main)", root.name))?;
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        sig = signals.recv() => {
            info!(signal = sig, "forwarding termination to root agent");
            if let Some(pid) = pid {
                // SAFETY: SIGTERM to our own child; ESRCH is harmless.
                unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM); }
            }
            child.wait().await?
        }
    };
    if let Some(pid) = pid {
        tracker.untrack(pid);
    }
    Ok(status.code().unwrap_or(1))
}

async fn run_root_openai(
    config: &SwarmConfig,
    session: &SessionPaths,
    root_id: &str,
    args: &StartArgs,
    logger: Arc<SessionLogger>,
    signals: &mut TermSignals,
) -> Result<i32> {
    let root = config.main_instance();
    // Validated at load time: OpenAI instances always carry settings.
    let openai = root.openai.as_ref().context("missing OpenAI settings")?;
    let api_key = std::env::var(&openai.token_env).unwrap_or_default();

    let mut agent = OpenaiAgent::new(
        OpenaiAgentConfig {
            instance_name: root.name.clone(),
            instance_id: root_id.to_string(),
            directory: root.directory().to_path_buf(),
            model: root.model.clone(),
            prompt: root.prompt.clone(),
            temperature: openai.temperature,
            api_version: openai.api_version,
            base_url: openai.base_url.clone(),
            mcp_config_path: session.wiring_path(&root.name),
        },
        api_key,
        logger.clone(),
    );

    let prompt = args.prompt.clone().unwrap_or_else(|| ROOT_SEED_PROMPT.to_string());
    logger.log_request(&prompt);

    let task_options = TaskOptions::default();
    let outcome = tokio::select! {
        outcome = agent.execute(&prompt, &task_options) => outcome,
        sig = signals.recv() => {
            warn!(signal = sig, "interrupted while running root agent");
            agent.shutdown_peers().await;
            return Ok(130);
        }
    };
    agent.shutdown_peers().await;

    match outcome {
        Ok(outcome) => {
            println!("{}", outcome.result);
            Ok(if outcome.is_error { 1 } else { 0 })
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(1)
        }
    }
}

/// Runs exactly once, after the root agent exits (or a signal took it down).
fn shutdown(
    config: &SwarmConfig,
    session: &SessionPaths,
    tracker: &ProcessTracker,
    worktree_manager: Option<&WorktreeManager>,
) {
    if let Some(manager) = worktree_manager {
        for warning in manager.cleanup() {
            eprintln!("{warning}");
        }
    }
    tracker.cleanup_all();
    paths::remove_run_symlink(session);

    match cost::aggregate_session_cost(&session.json_log_path(), &config.main) {
        Ok(summary) if !summary.by_instance.is_empty() => {
            println!("{}", summary.render());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to aggregate session cost"),
    }
    println!("Session saved: {}", session.root().display());
}

#[cfg(test)]
#[path = "start_cmd_tests.rs"]
mod tests;
