//! PID-file based tracking of spawned sub-processes.
//!
//! Every spawned child gets a `pids/<pid>` file containing its human label.
//! Cleanup sends SIGTERM to each live PID and removes the directory. The
//! tracker only ever signals PIDs it recorded itself; grandchildren belong
//! to their own parents.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct ProcessTracker {
    pids_dir: PathBuf,
}

impl ProcessTracker {
    pub fn new(pids_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(pids_dir)
            .with_context(|| format!("Failed to create pids directory {}", pids_dir.display()))?;
        Ok(Self {
            pids_dir: pids_dir.to_path_buf(),
        })
    }

    pub fn pids_dir(&self) -> &Path {
        &self.pids_dir
    }

    /// Record a child process under its PID.
    pub fn track(&self, pid: u32, label: &str) -> Result<()> {
        let path = self.pids_dir.join(pid.to_string());
        std::fs::write(&path, label)
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        tracing::debug!(pid, label, "tracking child process");
        Ok(())
    }

    /// Stop tracking a PID (child exited normally).
    pub fn untrack(&self, pid: u32) {
        let path = self.pids_dir.join(pid.to_string());
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(pid, error = %e, "failed to remove pid file");
            }
        }
    }

    /// Currently tracked (pid, label) pairs.
    pub fn tracked(&self) -> Vec<(u32, String)> {
        let mut tracked = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.pids_dir) else {
            return tracked;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
                continue;
            };
            let label = std::fs::read_to_string(entry.path()).unwrap_or_default();
            tracked.push((pid, label));
        }
        tracked.sort_by_key(|(pid, _)| *pid);
        tracked
    }

    /// Best-effort termination of every tracked child, then removal of the
    /// pids directory. Already-dead processes are ignored.
    pub fn cleanup_all(&self) {
        for (pid, label) in self.tracked() {
            // SAFETY: kill(2) with SIGTERM has no memory preconditions; a
            // stale PID yields ESRCH which we ignore.
            let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if ret == 0 {
                tracing::info!(pid, label = %label.trim(), "sent SIGTERM to child");
            } else {
                tracing::debug!(pid, "child already gone");
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&self.pids_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove pids directory");
            }
        }
    }
}
