//! Per-instance state records under `state/<instance_id>.json`.
//!
//! Records are rewritten whole under an exclusive `flock(2)`: lock, truncate,
//! write, unlock. Multiple processes in the tree may update records
//! concurrently (each sub-agent run persists the captured provider session
//! id); the lock keeps every record internally consistent and makes the
//! outcome of a race "last writer wins".

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub instance_name: String,
    pub instance_id: String,
    /// Provider-assigned conversation id, captured from the first
    /// `system/init` stream event. None before the first run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl InstanceState {
    pub fn new(instance_name: &str, instance_id: &str, status: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            instance_id: instance_id.to_string(),
            claude_session_id: None,
            status: status.to_string(),
            updated_at: Utc::now(),
        }
    }
}

pub fn state_path(state_dir: &Path, instance_id: &str) -> PathBuf {
    state_dir.join(format!("{instance_id}.json"))
}

/// Atomically replace the record for `state.instance_id`.
pub fn save_state(state_dir: &Path, state: &InstanceState) -> Result<()> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;
    let path = state_path(state_dir, &state.instance_id);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `file`. LOCK_EX blocks
    // until the concurrent writer finishes; the lock is released below.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to lock state file {}", path.display()));
    }

    let result = write_locked(&mut file, state);

    // SAFETY: same fd; LOCK_UN releases the advisory lock. Closing the file
    // would release it as well, but explicit release keeps timing exact.
    unsafe {
        libc::flock(fd, libc::LOCK_UN);
    }

    result.with_context(|| format!("Failed to write state file {}", path.display()))
}

fn write_locked(file: &mut std::fs::File, state: &InstanceState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    file.set_len(0)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Load one record by path, holding a shared read of the full content.
pub fn load_state(path: &Path) -> Result<InstanceState> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid state record {}", path.display()))
}

/// All records in a session's state directory.
pub fn load_all(state_dir: &Path) -> Result<Vec<InstanceState>> {
    let mut states = Vec::new();
    let entries = match std::fs::read_dir(state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to read state directory {}", state_dir.display())
            });
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            states.push(load_state(&path)?);
        }
    }
    Ok(states)
}

/// Find the record for a given instance name, if one was saved.
pub fn find_by_name(state_dir: &Path, instance_name: &str) -> Result<Option<InstanceState>> {
    Ok(load_all(state_dir)?
        .into_iter()
        .find(|state| state.instance_name == instance_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut state = InstanceState::new("backend", "backend_1a2b3c4d", "pending");
        state.claude_session_id = Some("sess-123".into());

        save_state(dir.path(), &state).unwrap();

        let loaded = load_state(&state_path(dir.path(), "backend_1a2b3c4d")).unwrap();
        assert_eq!(loaded.instance_name, "backend");
        assert_eq!(loaded.instance_id, "backend_1a2b3c4d");
        assert_eq!(loaded.claude_session_id.as_deref(), Some("sess-123"));
        assert_eq!(loaded.status, "pending");
    }

    #[test]
    fn test_save_overwrites_longer_previous_content() {
        let dir = tempdir().unwrap();
        let mut state = InstanceState::new("backend", "backend_1a2b3c4d", "active");
        state.claude_session_id = Some("a-very-long-session-identifier-0001".into());
        save_state(dir.path(), &state).unwrap();

        state.claude_session_id = Some("s2".into());
        save_state(dir.path(), &state).unwrap();

        // Truncate-then-write must not leave trailing bytes of the longer
        // first record behind.
        let loaded = load_state(&state_path(dir.path(), "backend_1a2b3c4d")).unwrap();
        assert_eq!(loaded.claude_session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_find_by_name() {
        let dir = tempdir().unwrap();
        save_state(dir.path(), &InstanceState::new("lead", "lead_00000001", "active")).unwrap();
        save_state(dir.path(), &InstanceState::new("backend", "backend_00000002", "active"))
            .unwrap();

        let found = find_by_name(dir.path(), "backend").unwrap().unwrap();
        assert_eq!(found.instance_id, "backend_00000002");
        assert!(find_by_name(dir.path(), "ghost").unwrap().is_none());
    }

    #[test]
    fn test_load_all_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let states = load_all(&dir.path().join("nope")).unwrap();
        assert!(states.is_empty());
    }

    #[test]
    fn test_concurrent_writers_to_distinct_files_never_corrupt() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().to_path_buf();

        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let state_dir = state_dir.clone();
                std::thread::spawn(move || {
                    let instance_id = format!("agent{writer}_0000000{writer}");
                    for round in 0..50 {
                        let mut state = InstanceState::new(
                            &format!("agent{writer}"),
                            &instance_id,
                            "active",
                        );
                        state.claude_session_id = Some(format!("sess-{writer}-{round}"));
                        save_state(&state_dir, &state).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for writer in 0..4 {
            let path = state_path(&state_dir, &format!("agent{writer}_0000000{writer}"));
            let loaded = load_state(&path).unwrap();
            assert_eq!(
                loaded.claude_session_id.as_deref(),
                Some(format!("sess-{writer}-49").as_str())
            );
        }
    }

    #[test]
    fn test_concurrent_writers_to_same_file_end_with_valid_json() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().to_path_buf();

        let handles: Vec<_> = (0..2)
            .map(|writer| {
                let state_dir = state_dir.clone();
                std::thread::spawn(move || {
                    for round in 0..100 {
                        let mut state =
                            InstanceState::new("shared", "shared_deadbeef", "active");
                        state.claude_session_id = Some(format!("sess-{writer}-{round}"));
                        save_state(&state_dir, &state).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Last writer wins; either writer's final value is acceptable, but
        // the record must parse.
        let loaded = load_state(&state_path(&state_dir, "shared_deadbeef")).unwrap();
        let id = loaded.claude_session_id.unwrap();
        assert!(id == "sess-0-99" || id == "sess-1-99", "got {id}");
    }
}
