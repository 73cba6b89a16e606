//! Topology document loading and validation.
//!
//! The document is parsed in two steps: a raw `serde` pass that enforces the
//! YAML shape, then a materialization pass that applies defaults, resolves
//! directories, and runs the semantic invariants in a fixed order (top-level
//! shape, per-instance shape, provider coherence, path existence, graph
//! validity). The first failing check aborts the load; no partial
//! configuration is ever returned.

mod document;
mod graph;

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use swarm_core::SwarmError;

pub use document::{McpPeer, McpType};
use document::{RawApiVersion, RawDocument, RawInstance, RawProvider, RawWorktree};

const SUPPORTED_VERSION: u64 = 1;
const DEFAULT_MODEL: &str = "sonnet";
const DEFAULT_TEMPERATURE: f64 = 0.3;
const DEFAULT_OPENAI_TOKEN_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Claude,
    Openai,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Openai => "openai",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    ChatCompletion,
    Responses,
}

/// Per-instance worktree request from the document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorktreeSetting {
    /// Key absent: follow the CLI-wide worktree flag.
    #[default]
    Unset,
    /// `worktree: false`: keep the original directory even under a CLI-wide
    /// worktree.
    Disabled,
    /// `worktree: true`: use the session-shared worktree name.
    Shared,
    /// `worktree: "<name>"`: use that name.
    Named(String),
}

/// OpenAI provider settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenaiSettings {
    pub temperature: f64,
    pub api_version: ApiVersion,
    pub token_env: String,
    pub base_url: Option<String>,
}

/// A fully materialized instance: defaults applied, directories resolved.
#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    pub description: String,
    /// Resolved absolute directories; never empty.
    pub directories: Vec<PathBuf>,
    pub model: String,
    pub provider: Provider,
    pub connections: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub mcps: Vec<McpPeer>,
    pub prompt: Option<String>,
    pub vibe: bool,
    pub worktree: WorktreeSetting,
    /// Present iff `provider == Openai`.
    pub openai: Option<OpenaiSettings>,
}

impl Instance {
    /// Primary working directory (first declared).
    pub fn directory(&self) -> &Path {
        &self.directories[0]
    }

    /// Non-primary directories, passed to the agent CLI via `--add-dir`.
    pub fn extra_directories(&self) -> &[PathBuf] {
        &self.directories[1..]
    }

    /// Declared tools plus one `mcp__<peer>` entry per outbound connection.
    ///
    /// This is the allow-list actually handed to the agent CLI; without the
    /// `mcp__` entries the agent could not call its connected instances.
    pub fn expanded_allowed_tools(&self) -> Vec<String> {
        let mut tools = self.allowed_tools.clone();
        tools.extend(self.connections.iter().map(|peer| format!("mcp__{peer}")));
        tools
    }
}

/// A validated topology plus the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub name: String,
    pub main: String,
    pub before: Vec<String>,
    pub instances: IndexMap<String, Instance>,
    pub base_dir: PathBuf,
    /// Absolute path of the source document, when loaded from disk.
    pub source_path: Option<PathBuf>,
}

impl SwarmConfig {
    /// Load and validate a topology document, resolving relative directories
    /// against the current working directory.
    pub fn load(path: &Path) -> Result<Self, SwarmError> {
        let base_dir = std::env::current_dir()
            .map_err(|e| SwarmError::config(format!("Cannot determine working directory: {e}")))?;
        Self::load_with_base_dir(path, &base_dir)
    }

    /// Load with an explicit base directory for relative paths. Used on
    /// restore, where the session's saved copy of the document must resolve
    /// against the original launch directory.
    pub fn load_with_base_dir(path: &Path, base_dir: &Path) -> Result<Self, SwarmError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwarmError::config(format!("Cannot read configuration '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_str(&content, base_dir)?;
        config.source_path = Some(absolutize(path, base_dir));
        Ok(config)
    }

    /// Parse and validate a document from a string.
    pub fn from_str(content: &str, base_dir: &Path) -> Result<Self, SwarmError> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| SwarmError::config(format!("Invalid YAML: {e}")))?;

        let version = value
            .get("version")
            .and_then(serde_yaml::Value::as_u64)
            .ok_or_else(|| SwarmError::config("Missing or non-integer 'version' field"))?;
        if version != SUPPORTED_VERSION {
            return Err(SwarmError::config(format!(
                "Unsupported configuration version {version} (only version {SUPPORTED_VERSION} is supported)"
            )));
        }

        let raw: RawDocument = serde_yaml::from_value(value)
            .map_err(|e| SwarmError::config(format!("Invalid configuration: {e}")))?;

        let mut instances = IndexMap::with_capacity(raw.swarm.instances.len());
        for (name, raw_instance) in raw.swarm.instances {
            let instance = materialize(&name, raw_instance, base_dir)?;
            instances.insert(name, instance);
        }

        for instance in instances.values() {
            check_directories(instance)?;
        }

        if !instances.contains_key(&raw.swarm.main) {
            return Err(SwarmError::config(format!(
                "Main instance '{}' not found in instances",
                raw.swarm.main
            )));
        }
        for instance in instances.values() {
            for connection in &instance.connections {
                if !instances.contains_key(connection) {
                    return Err(SwarmError::config(format!(
                        "Connection '{}' of instance '{}' references an unknown instance",
                        connection, instance.name
                    )));
                }
            }
        }
        graph::detect_cycles(&instances)?;

        Ok(Self {
            name: raw.swarm.name,
            main: raw.swarm.main,
            before: raw.swarm.before,
            instances,
            base_dir: base_dir.to_path_buf(),
            source_path: None,
        })
    }

    pub fn main_instance(&self) -> &Instance {
        // Validated at load time: `main` always names an instance.
        &self.instances[&self.main]
    }

    /// True when any instance opts into a worktree on its own.
    pub fn any_instance_requests_worktree(&self) -> bool {
        self.instances.values().any(|i| {
            matches!(
                i.worktree,
                WorktreeSetting::Shared | WorktreeSetting::Named(_)
            )
        })
    }
}

fn materialize(
    name: &str,
    raw: RawInstance,
    base_dir: &Path,
) -> Result<Instance, SwarmError> {
    check_instance_name(name)?;

    if raw.description.trim().is_empty() {
        return Err(SwarmError::config(format!(
            "Instance '{name}' requires a non-empty description"
        )));
    }

    let allowed_tools = match (raw.allowed_tools, raw.tools) {
        (Some(_), Some(_)) => {
            return Err(SwarmError::config(format!(
                "Instance '{name}' declares both 'tools' and 'allowed_tools'; use one"
            )));
        }
        (Some(tools), None) | (None, Some(tools)) => tools,
        (None, None) => Vec::new(),
    };

    let provider = match raw.provider {
        Some(RawProvider::Openai) => Provider::Openai,
        Some(RawProvider::Claude) | None => Provider::Claude,
    };

    if provider == Provider::Claude {
        let openai_only: [(&str, bool); 4] = [
            ("temperature", raw.temperature.is_some()),
            ("api_version", raw.api_version.is_some()),
            ("openai_token_env", raw.openai_token_env.is_some()),
            ("base_url", raw.base_url.is_some()),
        ];
        for (field, present) in openai_only {
            if present {
                return Err(SwarmError::config(format!(
                    "Field '{field}' is only allowed on OpenAI instances (instance '{name}' has provider 'claude')"
                )));
            }
        }
    }

    let openai = if provider == Provider::Openai {
        let token_env = raw
            .openai_token_env
            .unwrap_or_else(|| DEFAULT_OPENAI_TOKEN_ENV.to_string());
        let token = std::env::var(&token_env).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(SwarmError::config(format!(
                "Environment variable '{token_env}' is not set. OpenAI provider instances require an API key."
            )));
        }
        Some(OpenaiSettings {
            temperature: raw.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            api_version: match raw.api_version {
                Some(RawApiVersion::Responses) => ApiVersion::Responses,
                Some(RawApiVersion::ChatCompletion) | None => ApiVersion::ChatCompletion,
            },
            token_env,
            base_url: raw.base_url,
        })
    } else {
        None
    };

    let directories = raw
        .directory
        .map(document::OneOrMany::into_vec)
        .unwrap_or_default();
    if directories.is_empty() {
        return Err(SwarmError::config(format!(
            "Instance '{name}' requires at least one directory"
        )));
    }
    let directories = directories
        .iter()
        .map(|dir| resolve_directory(dir, base_dir))
        .collect::<Result<Vec<_>, _>>()?;

    for peer in &raw.mcps {
        match peer.kind {
            McpType::Stdio if peer.command.is_none() => {
                return Err(SwarmError::config(format!(
                    "MCP '{}' on instance '{name}' has type 'stdio' but no command",
                    peer.name
                )));
            }
            McpType::Sse if peer.url.is_none() => {
                return Err(SwarmError::config(format!(
                    "MCP '{}' on instance '{name}' has type 'sse' but no url",
                    peer.name
                )));
            }
            _ => {}
        }
    }

    let worktree = match raw.worktree {
        None => WorktreeSetting::Unset,
        Some(RawWorktree::Flag(true)) => WorktreeSetting::Shared,
        Some(RawWorktree::Flag(false)) => WorktreeSetting::Disabled,
        Some(RawWorktree::Name(worktree_name)) => {
            if worktree_name.trim().is_empty() {
                return Err(SwarmError::config(format!(
                    "Instance '{name}' has an empty worktree name"
                )));
            }
            WorktreeSetting::Named(worktree_name)
        }
    };

    // Permission prompts make no sense for a headless API loop.
    let vibe = match provider {
        Provider::Openai => true,
        Provider::Claude => raw.vibe.unwrap_or(false),
    };

    Ok(Instance {
        name: name.to_string(),
        description: raw.description,
        directories,
        model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        provider,
        connections: raw.connections,
        allowed_tools,
        disallowed_tools: raw.disallowed_tools,
        mcps: raw.mcps,
        prompt: raw.prompt,
        vibe,
        worktree,
        openai,
    })
}

fn check_instance_name(name: &str) -> Result<(), SwarmError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SwarmError::config(format!(
            "Instance name '{name}' contains invalid characters (allowed: letters, digits, '_', '-')"
        )))
    }
}

fn check_directories(instance: &Instance) -> Result<(), SwarmError> {
    for dir in &instance.directories {
        if !dir.is_dir() {
            return Err(SwarmError::config(format!(
                "Directory '{}' for instance '{}' does not exist",
                dir.display(),
                instance.name
            )));
        }
    }
    Ok(())
}

/// Expand `~`, join relative paths onto `base_dir`, and normalize `.`/`..`
/// components lexically. The result is not canonicalized, so restoring from a
/// session with the original base directory reproduces identical paths.
fn resolve_directory(raw: &str, base_dir: &Path) -> Result<PathBuf, SwarmError> {
    let expanded = expand_tilde(raw)?;
    Ok(absolutize(&expanded, base_dir))
}

fn expand_tilde(raw: &str) -> Result<PathBuf, SwarmError> {
    if raw == "~" || raw.starts_with("~/") {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| SwarmError::config("Cannot determine home directory"))?;
        let home = base.home_dir();
        if raw == "~" {
            Ok(home.to_path_buf())
        } else {
            Ok(home.join(&raw[2..]))
        }
    } else {
        Ok(PathBuf::from(raw))
    }
}

fn absolutize(path: &Path, base_dir: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
