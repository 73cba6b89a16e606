//! Session metadata: versions, launch context, and worktree mappings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths::SessionPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub swarm_name: String,
    pub start_directory: PathBuf,
    pub created_at: DateTime<Utc>,
    pub orchestrator_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeMetadata>,
}

/// Worktree remapping recorded at launch so a restore can re-apply the same
/// directories without re-deriving them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeMetadata {
    /// Session-shared worktree name (instances with a custom name record it
    /// per mapping).
    pub shared_name: String,
    /// Instance name to its ordered directory mappings.
    pub instances: HashMap<String, Vec<DirectoryMapping>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    pub original: PathBuf,
    pub mapped: PathBuf,
}

impl SessionMetadata {
    pub fn new(swarm_name: &str, start_directory: &Path, version: &str) -> Self {
        Self {
            swarm_name: swarm_name.to_string(),
            start_directory: start_directory.to_path_buf(),
            created_at: Utc::now(),
            orchestrator_version: version.to_string(),
            worktree: None,
        }
    }

    pub fn save(&self, session: &SessionPaths) -> Result<()> {
        let path = session.metadata_path();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load(session: &SessionPaths) -> Result<Self> {
        let path = session.metadata_path();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid session metadata {}", path.display()))
    }
}
