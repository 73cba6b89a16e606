//! Deterministic on-disk locations for a swarm session.
//!
//! Layout under the swarm home (`CLAUDE_SWARM_HOME` or `~/.claude-swarm`):
//!
//! ```text
//! <home>/
//!   .gitignore                          # contains "*"
//!   run/<session-id>                    # symlink to the session directory
//!   worktrees/<session-id>/...
//!   sessions/<project-slug>/<session-id>/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Base directory override for all session state.
pub const HOME_ENV: &str = "CLAUDE_SWARM_HOME";
/// Set by the orchestrator before spawning; read by every child process.
pub const SESSION_PATH_ENV: &str = "CLAUDE_SWARM_SESSION_PATH";
/// Original launch directory, used by restoration.
pub const START_DIR_ENV: &str = "CLAUDE_SWARM_START_DIR";

/// Resolve the swarm home directory.
pub fn swarm_home() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".claude-swarm"))
        .unwrap_or_else(|| PathBuf::from(".claude-swarm"))
}

/// Project slug: the absolute launch directory with path separators and
/// colons collapsed to `+`.
pub fn project_slug(launch_dir: &Path) -> String {
    launch_dir
        .to_string_lossy()
        .replace(['/', ':'], "+")
}

/// New session identifier from the local wall clock.
pub fn new_session_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Handle to one session directory and its well-known children.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    home: PathBuf,
    root: PathBuf,
    session_id: String,
}

impl SessionPaths {
    /// Create (or reuse) the canonical session directory for `launch_dir` and
    /// `session_id`, including the `state/` and `pids/` subdirectories and
    /// the home-level gitignore guard.
    pub fn create(home: &Path, launch_dir: &Path, session_id: &str) -> Result<Self> {
        let root = home
            .join("sessions")
            .join(project_slug(launch_dir))
            .join(session_id);
        std::fs::create_dir_all(root.join("state"))
            .with_context(|| format!("Failed to create session directory {}", root.display()))?;
        std::fs::create_dir_all(root.join("pids"))?;
        ensure_gitignore(home)?;
        Ok(Self {
            home: home.to_path_buf(),
            root,
            session_id: session_id.to_string(),
        })
    }

    /// Open an existing session directory (restore path, or a child process
    /// recovering the session from the environment).
    pub fn open(home: &Path, root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("Session directory '{}' does not exist", root.display());
        }
        let session_id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Session directory has no name")?;
        std::fs::create_dir_all(root.join("state"))?;
        std::fs::create_dir_all(root.join("pids"))?;
        Ok(Self {
            home: home.to_path_buf(),
            root: root.to_path_buf(),
            session_id,
        })
    }

    /// Recover the session published by the parent orchestrator, if any.
    pub fn from_env() -> Option<Self> {
        let root = std::env::var(SESSION_PATH_ENV).ok()?;
        Self::open(&swarm_home(), Path::new(&root)).ok()
    }

    /// Publish this session to child processes via the environment.
    pub fn publish_env(&self, start_dir: &Path) {
        // SAFETY: called once from the single-threaded orchestrator setup
        // path, before any worker threads or children are spawned.
        unsafe {
            std::env::set_var(SESSION_PATH_ENV, &self.root);
            std::env::set_var(START_DIR_ENV, start_dir);
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("session.log")
    }

    pub fn json_log_path(&self) -> PathBuf {
        self.root.join("session.log.json")
    }

    /// Per-instance MCP wiring document.
    pub fn wiring_path(&self, instance_name: &str) -> PathBuf {
        self.root.join(format!("{instance_name}.mcp.json"))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("session_metadata.json")
    }

    /// Verbatim copy of the original topology document.
    pub fn config_copy_path(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    /// Plain-text file holding the original launch directory.
    pub fn start_directory_path(&self) -> PathBuf {
        self.root.join("start_directory")
    }

    /// Plain-text file holding the absolute path of the source topology.
    pub fn source_config_path_file(&self) -> PathBuf {
        self.root.join("swarm_config_path")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.home.join("worktrees").join(&self.session_id)
    }
}

/// Guard the whole home directory against accidental commits.
pub fn ensure_gitignore(home: &Path) -> Result<()> {
    std::fs::create_dir_all(home)?;
    let gitignore = home.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "*\n")
            .with_context(|| format!("Failed to write {}", gitignore.display()))?;
    }
    Ok(())
}

/// Create `run/<session-id>` pointing at the session directory. A stale link
/// with the same name is replaced.
pub fn create_run_symlink(session: &SessionPaths) -> Result<PathBuf> {
    let run_dir = session.home().join("run");
    std::fs::create_dir_all(&run_dir)?;
    let link = run_dir.join(session.session_id());
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(session.root(), &link)
        .with_context(|| format!("Failed to create run symlink {}", link.display()))?;
    Ok(link)
}

/// Remove the run symlink; missing links are ignored.
pub fn remove_run_symlink(session: &SessionPaths) {
    let link = session.home().join("run").join(session.session_id());
    if link.symlink_metadata().is_ok() {
        if let Err(e) = std::fs::remove_file(&link) {
            tracing::warn!(link = %link.display(), error = %e, "failed to remove run symlink");
        }
    }
}

/// Resolve a `--session-id` argument: either a path to a session directory
/// or a bare id searched across all project slugs.
pub fn resolve_session_arg(home: &Path, arg: &str) -> Result<PathBuf> {
    let as_path = PathBuf::from(arg);
    if as_path.is_dir() {
        return Ok(as_path);
    }
    let sessions_root = home.join("sessions");
    let entries = std::fs::read_dir(&sessions_root)
        .with_context(|| format!("No sessions directory at {}", sessions_root.display()))?;
    for entry in entries.flatten() {
        let candidate = entry.path().join(arg);
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }
    bail!("No session '{arg}' found under {}", sessions_root.display())
}

/// Enumerate all session directories under the home, newest first.
pub fn list_session_roots(home: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let Ok(projects) = std::fs::read_dir(home.join("sessions")) else {
        return roots;
    };
    for project in projects.flatten() {
        let Ok(sessions) = std::fs::read_dir(project.path()) else {
            continue;
        };
        for session in sessions.flatten() {
            if session.path().is_dir() {
                roots.push(session.path());
            }
        }
    }
    roots.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_project_slug_collapses_separators() {
        assert_eq!(
            project_slug(Path::new("/home/user/my project")),
            "+home+user+my project"
        );
    }

    #[test]
    fn test_project_slug_collapses_colons() {
        assert_eq!(project_slug(Path::new("/srv/a:b")), "+srv+a+b");
    }

    #[test]
    fn test_create_builds_layout_and_gitignore() {
        let home = tempdir().unwrap();
        let launch = tempdir().unwrap();
        let session =
            SessionPaths::create(home.path(), launch.path(), "20250101_120000").unwrap();

        assert!(session.state_dir().is_dir());
        assert!(session.pids_dir().is_dir());
        assert_eq!(session.session_id(), "20250101_120000");
        assert!(session.root().starts_with(home.path().join("sessions")));

        let gitignore = std::fs::read_to_string(home.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore, "*\n");
    }

    #[test]
    fn test_gitignore_not_overwritten() {
        let home = tempdir().unwrap();
        std::fs::write(home.path().join(".gitignore"), "custom\n").unwrap();
        ensure_gitignore(home.path()).unwrap();
        let content = std::fs::read_to_string(home.path().join(".gitignore")).unwrap();
        assert_eq!(content, "custom\n");
    }

    #[test]
    fn test_run_symlink_lifecycle() {
        let home = tempdir().unwrap();
        let launch = tempdir().unwrap();
        let session =
            SessionPaths::create(home.path(), launch.path(), "20250101_120000").unwrap();

        let link = create_run_symlink(&session).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), session.root());

        // Re-creation replaces a stale link instead of failing.
        create_run_symlink(&session).unwrap();

        remove_run_symlink(&session);
        assert!(link.symlink_metadata().is_err());
    }

    #[test]
    fn test_resolve_session_arg_by_id_and_path() {
        let home = tempdir().unwrap();
        let launch = tempdir().unwrap();
        let session =
            SessionPaths::create(home.path(), launch.path(), "20250102_000000").unwrap();

        let by_id = resolve_session_arg(home.path(), "20250102_000000").unwrap();
        assert_eq!(by_id, session.root());

        let by_path =
            resolve_session_arg(home.path(), &session.root().to_string_lossy()).unwrap();
        assert_eq!(by_path, session.root());

        assert!(resolve_session_arg(home.path(), "19990101_000000").is_err());
    }

    #[test]
    fn test_open_requires_existing_directory() {
        let home = tempdir().unwrap();
        let missing = home.path().join("sessions/slug/20250101_000000");
        assert!(SessionPaths::open(home.path(), &missing).is_err());
    }

    #[test]
    fn test_list_session_roots_newest_first() {
        let home = tempdir().unwrap();
        let launch = tempdir().unwrap();
        SessionPaths::create(home.path(), launch.path(), "20250101_000000").unwrap();
        SessionPaths::create(home.path(), launch.path(), "20250103_000000").unwrap();
        SessionPaths::create(home.path(), launch.path(), "20250102_000000").unwrap();

        let ids: Vec<String> = list_session_roots(home.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            ids,
            vec!["20250103_000000", "20250102_000000", "20250101_000000"]
        );
    }
}
