use super::*;
use serial_test::serial;
use tempfile::tempdir;

fn doc_with_dir(dir: &Path) -> String {
    format!(
        r#"
version: 1
swarm:
  name: "Test swarm"
  main: lead
  instances:
    lead:
      description: "Lead developer"
      directory: {}
"#,
        dir.display()
    )
}

#[test]
fn test_minimal_document_defaults() {
    let dir = tempdir().unwrap();
    let config = SwarmConfig::from_str(&doc_with_dir(dir.path()), dir.path()).unwrap();

    assert_eq!(config.name, "Test swarm");
    assert_eq!(config.main, "lead");
    assert!(config.before.is_empty());

    let lead = config.main_instance();
    assert_eq!(lead.model, "sonnet");
    assert_eq!(lead.provider, Provider::Claude);
    assert!(!lead.vibe);
    assert!(lead.connections.is_empty());
    assert!(lead.allowed_tools.is_empty());
    assert_eq!(lead.worktree, WorktreeSetting::Unset);
    assert!(lead.openai.is_none());
}

#[test]
fn test_unsupported_version_rejected() {
    let dir = tempdir().unwrap();
    let content = doc_with_dir(dir.path()).replace("version: 1", "version: 2");
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string().contains("Unsupported configuration version 2"),
        "got: {err}"
    );
}

#[test]
fn test_missing_version_rejected() {
    let err = SwarmConfig::from_str("swarm:\n  name: x\n  main: a\n  instances: {}\n", Path::new("/tmp"))
        .unwrap_err();
    assert!(err.to_string().contains("version"), "got: {err}");
}

#[test]
fn test_directory_accepts_scalar_and_list() {
    let dir = tempdir().unwrap();
    let sub_a = dir.path().join("a");
    let sub_b = dir.path().join("b");
    std::fs::create_dir_all(&sub_a).unwrap();
    std::fs::create_dir_all(&sub_b).unwrap();

    let content = format!(
        r#"
version: 1
swarm:
  name: "Multi"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: ["{}", "{}"]
"#,
        sub_a.display(),
        sub_b.display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    let lead = config.main_instance();
    assert_eq!(lead.directories.len(), 2);
    assert_eq!(lead.directory(), sub_a.as_path());
    assert_eq!(lead.extra_directories(), &[sub_b.clone()]);
}

#[test]
fn test_relative_directory_resolved_against_base_dir() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("backend")).unwrap();

    let content = r#"
version: 1
swarm:
  name: "Rel"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: ./backend
"#;
    let config = SwarmConfig::from_str(content, dir.path()).unwrap();
    assert_eq!(config.main_instance().directory(), dir.path().join("backend"));
}

#[test]
fn test_restoration_is_idempotent() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("backend")).unwrap();

    let content = r#"
version: 1
swarm:
  name: "Rel"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: ./backend
"#;
    let first = SwarmConfig::from_str(content, dir.path()).unwrap();
    let second = SwarmConfig::from_str(content, dir.path()).unwrap();
    assert_eq!(
        first.main_instance().directories,
        second.main_instance().directories
    );
}

#[test]
fn test_missing_directory_rejected() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    let content = format!(
        r#"
version: 1
swarm:
  name: "Bad"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {}
"#,
        missing.display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Directory '{}' for instance 'lead' does not exist",
            missing.display()
        )
    );
}

#[test]
fn test_instance_without_directory_rejected() {
    let content = r#"
version: 1
swarm:
  name: "Bad"
  main: lead
  instances:
    lead:
      description: "Lead"
"#;
    let err = SwarmConfig::from_str(content, Path::new("/tmp")).unwrap_err();
    assert!(
        err.to_string()
            .contains("Instance 'lead' requires at least one directory"),
        "got: {err}"
    );
}

#[test]
fn test_main_must_reference_existing_instance() {
    let dir = tempdir().unwrap();
    let content = doc_with_dir(dir.path()).replace("main: lead", "main: ghost");
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Main instance 'ghost' not found in instances"
    );
}

#[test]
fn test_unknown_connection_rejected_before_cycles() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Bad"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      connections: [ghost]
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Connection 'ghost' of instance 'lead' references an unknown instance"
    );
}

#[test]
fn test_two_node_cycle_reports_minimal_path() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Cycle"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      connections: [worker]
    worker:
      description: "Worker"
      directory: {dir}
      connections: [lead]
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Circular dependency detected: lead -> worker -> lead"
    );
}

#[test]
fn test_three_node_cycle_skips_acyclic_prefix() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Cycle"
  main: entry
  instances:
    entry:
      description: "Entry"
      directory: {dir}
      connections: [a]
    a:
      description: "A"
      directory: {dir}
      connections: [b]
    b:
      description: "B"
      directory: {dir}
      connections: [a]
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    // `entry` reaches the cycle but is not on it; the reported path starts at
    // the first node of the cycle itself.
    assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
}

#[test]
fn test_self_loop_is_a_cycle() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Cycle"
  main: solo
  instances:
    solo:
      description: "Solo"
      directory: {dir}
      connections: [solo]
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Circular dependency detected: solo -> solo"
    );
}

#[test]
fn test_diamond_graph_is_accepted() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Diamond"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      connections: [left, right]
    left:
      description: "Left"
      directory: {dir}
      connections: [shared]
    right:
      description: "Right"
      directory: {dir}
      connections: [shared]
    shared:
      description: "Shared"
      directory: {dir}
"#,
        dir = dir.path().display()
    );
    assert!(SwarmConfig::from_str(&content, dir.path()).is_ok());
}

#[test]
fn test_tools_alias_for_allowed_tools() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Tools"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      tools: [Read, Edit]
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    assert_eq!(config.main_instance().allowed_tools, vec!["Read", "Edit"]);
}

#[test]
fn test_tools_and_allowed_tools_together_rejected() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Tools"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      tools: [Read]
      allowed_tools: [Edit]
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string().contains("declares both 'tools' and 'allowed_tools'"),
        "got: {err}"
    );
}

#[test]
fn test_scalar_tools_field_rejected() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Tools"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      allowed_tools: Read
"#,
        dir = dir.path().display()
    );
    assert!(SwarmConfig::from_str(&content, dir.path()).is_err());
}

#[test]
fn test_expanded_allowed_tools_appends_connection_peers() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Wiring"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      allowed_tools: [Read, Edit]
      connections: [backend]
    backend:
      description: "Backend dev"
      directory: {dir}
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    assert_eq!(
        config.main_instance().expanded_allowed_tools(),
        vec!["Read", "Edit", "mcp__backend"]
    );
}

#[test]
fn test_worktree_settings_parse() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Worktrees"
  main: a
  instances:
    a:
      description: "Shared"
      directory: {dir}
      worktree: true
    b:
      description: "Disabled"
      directory: {dir}
      worktree: false
    c:
      description: "Named"
      directory: {dir}
      worktree: "feature-x"
    d:
      description: "Unset"
      directory: {dir}
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    assert_eq!(config.instances["a"].worktree, WorktreeSetting::Shared);
    assert_eq!(config.instances["b"].worktree, WorktreeSetting::Disabled);
    assert_eq!(
        config.instances["c"].worktree,
        WorktreeSetting::Named("feature-x".into())
    );
    assert_eq!(config.instances["d"].worktree, WorktreeSetting::Unset);
    assert!(config.any_instance_requests_worktree());
}

#[test]
fn test_stdio_mcp_requires_command() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Mcps"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      mcps:
        - name: helper
          type: stdio
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string()
            .contains("MCP 'helper' on instance 'lead' has type 'stdio' but no command"),
        "got: {err}"
    );
}

#[test]
fn test_sse_mcp_requires_url() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Mcps"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      mcps:
        - name: remote
          type: sse
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string()
            .contains("MCP 'remote' on instance 'lead' has type 'sse' but no url"),
        "got: {err}"
    );
}

#[test]
fn test_openai_field_on_claude_instance_rejected() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Bad"
  main: lead
  instances:
    lead:
      description: "Lead"
      directory: {dir}
      temperature: 0.9
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string()
            .contains("Field 'temperature' is only allowed on OpenAI instances"),
        "got: {err}"
    );
}

#[test]
#[serial]
fn test_openai_instance_requires_token_env() {
    // SAFETY: guarded by #[serial]; no other test observes this variable
    // concurrently.
    unsafe { std::env::remove_var("OPENAI_API_KEY") };

    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "OpenAI"
  main: planner
  instances:
    planner:
      description: "Planner"
      directory: {dir}
      provider: openai
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Environment variable 'OPENAI_API_KEY' is not set. OpenAI provider instances require an API key."
    );
}

#[test]
#[serial]
fn test_openai_defaults_and_forced_vibe() {
    // SAFETY: guarded by #[serial].
    unsafe { std::env::set_var("OPENAI_API_KEY", "sk-test") };

    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "OpenAI"
  main: planner
  instances:
    planner:
      description: "Planner"
      directory: {dir}
      provider: openai
      model: gpt-4o
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    let planner = config.main_instance();
    assert!(planner.vibe, "vibe is forced on for OpenAI instances");
    let openai = planner.openai.as_ref().unwrap();
    assert_eq!(openai.temperature, 0.3);
    assert_eq!(openai.api_version, ApiVersion::ChatCompletion);
    assert_eq!(openai.token_env, "OPENAI_API_KEY");
    assert!(openai.base_url.is_none());

    // SAFETY: guarded by #[serial].
    unsafe { std::env::remove_var("OPENAI_API_KEY") };
}

#[test]
#[serial]
fn test_openai_custom_token_env_and_api_version() {
    // SAFETY: guarded by #[serial].
    unsafe { std::env::set_var("MY_TOKEN", "sk-custom") };

    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "OpenAI"
  main: planner
  instances:
    planner:
      description: "Planner"
      directory: {dir}
      provider: openai
      api_version: responses
      openai_token_env: MY_TOKEN
      temperature: 0.7
      base_url: "https://proxy.example.com/v1"
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    let openai = config.main_instance().openai.as_ref().unwrap();
    assert_eq!(openai.api_version, ApiVersion::Responses);
    assert_eq!(openai.token_env, "MY_TOKEN");
    assert_eq!(openai.temperature, 0.7);
    assert_eq!(
        openai.base_url.as_deref(),
        Some("https://proxy.example.com/v1")
    );

    // SAFETY: guarded by #[serial].
    unsafe { std::env::remove_var("MY_TOKEN") };
}

#[test]
fn test_invalid_instance_name_rejected() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Bad"
  main: "bad name"
  instances:
    "bad name":
      description: "Broken"
      directory: {dir}
"#,
        dir = dir.path().display()
    );
    let err = SwarmConfig::from_str(&content, dir.path()).unwrap_err();
    assert!(
        err.to_string().contains("contains invalid characters"),
        "got: {err}"
    );
}

#[test]
fn test_before_commands_preserved_in_order() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
version: 1
swarm:
  name: "Before"
  main: lead
  before:
    - "echo one"
    - "echo two"
  instances:
    lead:
      description: "Lead"
      directory: {dir}
"#,
        dir = dir.path().display()
    );
    let config = SwarmConfig::from_str(&content, dir.path()).unwrap();
    assert_eq!(config.before, vec!["echo one", "echo two"]);
}

#[test]
fn test_load_records_source_path() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("claude-swarm.yml");
    std::fs::write(&config_path, doc_with_dir(dir.path())).unwrap();

    let config = SwarmConfig::load_with_base_dir(&config_path, dir.path()).unwrap();
    assert_eq!(config.source_path.as_deref(), Some(config_path.as_path()));
    assert_eq!(config.base_dir, dir.path());
}
