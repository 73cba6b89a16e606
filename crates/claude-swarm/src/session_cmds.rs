//! Session maintenance: enumeration and expiry.

use std::path::Path;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, TimeDelta};
use swarm_session::{cost, paths};

/// Swarm name and main instance pulled from a session's saved topology,
/// without running full validation (directories may be long gone).
fn read_saved_topology(session_root: &Path) -> (String, String) {
    let fallback = ("?".to_string(), String::new());
    let Ok(content) = std::fs::read_to_string(session_root.join("config.yml")) else {
        return fallback;
    };
    let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&content) else {
        return fallback;
    };
    let swarm = &value["swarm"];
    (
        swarm["name"].as_str().unwrap_or("?").to_string(),
        swarm["main"].as_str().unwrap_or_default().to_string(),
    )
}

pub fn handle_list_sessions() -> Result<()> {
    let home = paths::swarm_home();
    let roots = paths::list_session_roots(&home);
    if roots.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<17}  {:<24}  {:>10}  START DIRECTORY", "SESSION", "SWARM", "COST");
    for root in roots {
        let session_id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (swarm_name, main_instance) = read_saved_topology(&root);
        let total = cost::aggregate_session_cost(&root.join("session.log.json"), &main_instance)
            .map(|summary| summary.total_cost_usd)
            .unwrap_or(0.0);
        let start_dir = std::fs::read_to_string(root.join("start_directory"))
            .map(|dir| dir.trim().to_string())
            .unwrap_or_default();
        println!("{session_id:<17}  {swarm_name:<24}  ${total:>9.4}  {start_dir}");
    }
    Ok(())
}

/// Parse a `<YYYYMMDD_HHMMSS>` session id into a local timestamp.
fn parse_session_timestamp(session_id: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(session_id, "%Y%m%d_%H%M%S").ok()
}

pub fn handle_clean(days: u64) -> Result<()> {
    let home = paths::swarm_home();
    let cutoff = Local::now().naive_local() - TimeDelta::days(days as i64);
    let mut removed = 0usize;

    for root in paths::list_session_roots(&home) {
        let session_id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(timestamp) = parse_session_timestamp(&session_id) else {
            continue;
        };
        if timestamp >= cutoff {
            continue;
        }
        match std::fs::remove_dir_all(&root) {
            Ok(()) => {
                removed += 1;
                println!("Removed session {session_id}");
            }
            Err(e) => eprintln!("Failed to remove {}: {e}", root.display()),
        }
    }

    // Drop run symlinks whose sessions no longer exist.
    if let Ok(entries) = std::fs::read_dir(home.join("run")) {
        for entry in entries.flatten() {
            let link = entry.path();
            let target_exists = std::fs::read_link(&link)
                .map(|target| target.is_dir())
                .unwrap_or(false);
            if !target_exists {
                let _ = std::fs::remove_file(&link);
            }
        }
    }

    println!("Removed {removed} session(s) older than {days} day(s)");
    Ok(())
}
