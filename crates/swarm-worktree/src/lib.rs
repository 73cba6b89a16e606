//! Per-session git worktree management.
//!
//! Instances that opt in get their directories remapped into isolated
//! worktrees under `<swarm_home>/worktrees/<session-id>/`, so edits from one
//! agent cannot leak into another's checkout. Reuse is keyed on
//! `(absolute repo path, worktree name)`; the repo-path hash only keeps the
//! external directory names short and collision-resistant.

pub mod git;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use swarm_core::ids::hex_prefix;
use tracing::{debug, info, warn};

/// A worktree skipped during cleanup, with the reason it was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Keeping worktree {} ({})",
            self.path.display(),
            self.reason
        )
    }
}

/// One materialized worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeHandle {
    pub repo_root: PathBuf,
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug)]
pub struct WorktreeManager {
    /// `<swarm_home>/worktrees/<session-id>`
    worktrees_root: PathBuf,
    session_id: String,
    handles: Vec<WorktreeHandle>,
}

impl WorktreeManager {
    pub fn new(worktrees_root: &Path, session_id: &str) -> Self {
        Self {
            worktrees_root: worktrees_root.to_path_buf(),
            session_id: session_id.to_string(),
            handles: Vec::new(),
        }
    }

    /// Session-scoped fallback name for `worktree: true` without an explicit
    /// CLI name.
    pub fn default_shared_name(&self) -> String {
        format!("worktree-{}", self.session_id)
    }

    pub fn handles(&self) -> &[WorktreeHandle] {
        &self.handles
    }

    /// Map one instance directory into a worktree named `name`.
    ///
    /// Directories outside version control pass through unchanged. A
    /// directory below the repository root maps to the same relative path
    /// inside the worktree. Existing worktrees and branches with the same
    /// name are reused.
    pub fn map_directory(&mut self, dir: &Path, name: &str) -> Result<PathBuf> {
        let Some(repo_root) = git::repo_root(dir) else {
            debug!(dir = %dir.display(), "not a git repository, passing through");
            return Ok(dir.to_path_buf());
        };

        let basename = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string());
        let container = self.worktrees_root.join(format!(
            "{basename}-{}",
            hex_prefix(repo_root.to_string_lossy().as_bytes())
        ));
        let worktree_path = container.join(name);

        if !worktree_path.exists() {
            std::fs::create_dir_all(&container).with_context(|| {
                format!("Failed to create worktree container {}", container.display())
            })?;
            git::worktree_add(&repo_root, &worktree_path, name)?;
        } else {
            info!(path = %worktree_path.display(), "reusing existing worktree");
        }

        let handle = WorktreeHandle {
            repo_root: repo_root.clone(),
            path: worktree_path.clone(),
            name: name.to_string(),
        };
        if !self.handles.contains(&handle) {
            self.handles.push(handle);
        }

        let relative = dir.strip_prefix(&repo_root).unwrap_or(Path::new(""));
        Ok(if relative.as_os_str().is_empty() {
            worktree_path
        } else {
            worktree_path.join(relative)
        })
    }

    /// Re-register a worktree from saved session metadata without touching
    /// the filesystem (restore path).
    pub fn adopt(&mut self, repo_root: &Path, path: &Path, name: &str) {
        let handle = WorktreeHandle {
            repo_root: repo_root.to_path_buf(),
            path: path.to_path_buf(),
            name: name.to_string(),
        };
        if !self.handles.contains(&handle) {
            self.handles.push(handle);
        }
    }

    /// Remove every clean worktree created for this session.
    ///
    /// A worktree with uncommitted changes or unpushed commits is left in
    /// place and reported as a warning. Empty enclosing directories are
    /// pruned afterwards.
    pub fn cleanup(&self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();

        for handle in &self.handles {
            if !handle.path.exists() {
                continue;
            }
            if handle.path == handle.repo_root {
                // A passthrough should never be registered; refuse to touch a
                // main checkout regardless.
                warn!(path = %handle.path.display(), "refusing to remove main repository checkout");
                continue;
            }
            match self.check_removable(&handle.path) {
                Ok(None) => {
                    if let Err(e) = git::worktree_remove(&handle.repo_root, &handle.path) {
                        warnings.push(CleanupWarning {
                            path: handle.path.clone(),
                            reason: format!("removal failed: {e:#}"),
                        });
                    }
                }
                Ok(Some(reason)) => {
                    warn!(path = %handle.path.display(), reason, "keeping worktree");
                    warnings.push(CleanupWarning {
                        path: handle.path.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    warnings.push(CleanupWarning {
                        path: handle.path.clone(),
                        reason: format!("status check failed: {e:#}"),
                    });
                }
            }
        }

        self.prune_empty_dirs();
        warnings
    }

    /// None when the worktree is clean; otherwise the reason to keep it.
    fn check_removable(&self, path: &Path) -> Result<Option<String>> {
        if git::has_uncommitted_changes(path)? {
            return Ok(Some("uncommitted changes".to_string()));
        }
        if git::has_unpushed_commits(path)? {
            return Ok(Some("unpushed commits".to_string()));
        }
        Ok(None)
    }

    fn prune_empty_dirs(&self) {
        for handle in &self.handles {
            if let Some(container) = handle.path.parent() {
                // remove_dir only succeeds on empty directories.
                let _ = std::fs::remove_dir(container);
            }
        }
        let _ = std::fs::remove_dir(&self.worktrees_root);
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
