//! Git CLI wrappers for worktree management.
//!
//! The git CLI inherits the user's configuration and credential helpers, so
//! no VCS library binding is needed. Each wrapper logs a structured event and
//! maps failures to errors carrying git's stderr.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Top-level directory of the repository containing `dir`, or None when the
/// directory is not under version control.
pub fn repo_root(dir: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

pub fn branch_exists(repo: &Path, branch: &str) -> bool {
    Command::new("git")
        .current_dir(repo)
        .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Add a worktree at `path` on branch `branch`, creating the branch from the
/// current HEAD when it does not exist yet.
pub fn worktree_add(repo: &Path, path: &Path, branch: &str) -> Result<()> {
    info!(
        event = "worktree.add_started",
        repo = %repo.display(),
        path = %path.display(),
        branch,
    );
    let path_str = path.to_string_lossy();
    if branch_exists(repo, branch) {
        run_git(repo, &["worktree", "add", &path_str, branch])?;
    } else {
        run_git(repo, &["worktree", "add", "-b", branch, &path_str])?;
    }
    info!(event = "worktree.add_completed", path = %path.display());
    Ok(())
}

/// Remove a registered worktree. Fails on dirty trees; callers gate on the
/// status checks below first.
pub fn worktree_remove(repo: &Path, path: &Path) -> Result<()> {
    info!(
        event = "worktree.remove_started",
        repo = %repo.display(),
        path = %path.display(),
    );
    run_git(repo, &["worktree", "remove", &path.to_string_lossy()])?;
    info!(event = "worktree.remove_completed", path = %path.display());
    Ok(())
}

/// Whether `path` is registered as a worktree of `repo`.
pub fn worktree_registered(repo: &Path, path: &Path) -> bool {
    let Ok(listing) = run_git(repo, &["worktree", "list", "--porcelain"]) else {
        return false;
    };
    listing.lines().any(|line| {
        line.strip_prefix("worktree ")
            .is_some_and(|registered| Path::new(registered) == path)
    })
}

/// Any staged or unstaged changes (including untracked files).
pub fn has_uncommitted_changes(dir: &Path) -> Result<bool> {
    let status = run_git(dir, &["status", "--porcelain"])?;
    Ok(!status.trim().is_empty())
}

/// Any local commit not present on a remote. Repositories without remotes
/// report every commit, which errs on the side of keeping the worktree.
pub fn has_unpushed_commits(dir: &Path) -> Result<bool> {
    let log = run_git(
        dir,
        &["log", "--branches", "--not", "--remotes", "--format=%H", "-n", "1"],
    )?;
    let unpushed = !log.trim().is_empty();
    debug!(dir = %dir.display(), unpushed, "checked for unpushed commits");
    Ok(unpushed)
}
