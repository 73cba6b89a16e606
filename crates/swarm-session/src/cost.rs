//! Cost aggregation over the JSON session log.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceCost {
    pub cost_usd: f64,
    pub calls: u64,
}

#[derive(Debug, Clone)]
pub struct CostSummary {
    /// Sum over all non-root result events.
    pub total_cost_usd: f64,
    pub by_instance: IndexMap<String, InstanceCost>,
    /// The root instance; its cost is not observable (it runs interactively)
    /// and is excluded from the total.
    pub main_instance: String,
}

impl CostSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, cost) in &self.by_instance {
            if name == &self.main_instance {
                out.push_str(&format!("  {name}: interactive\n"));
            } else {
                out.push_str(&format!(
                    "  {name}: ${:.4} ({} calls)\n",
                    cost.cost_usd, cost.calls
                ));
            }
        }
        out.push_str(&format!("Total cost: ${:.4}", self.total_cost_usd));
        out
    }
}

/// Sum `event.total_cost_usd` over `event.type == "result"` records,
/// excluding the root instance. Malformed lines are skipped.
pub fn aggregate_session_cost(json_log: &Path, main_instance: &str) -> Result<CostSummary> {
    let mut summary = CostSummary {
        total_cost_usd: 0.0,
        by_instance: IndexMap::new(),
        main_instance: main_instance.to_string(),
    };

    let content = match std::fs::read_to_string(json_log) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summary),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read session log {}", json_log.display()));
        }
    };

    for line in content.lines() {
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(instance) = entry.get("instance").and_then(Value::as_str) else {
            continue;
        };
        let event = &entry["event"];
        if event.get("type").and_then(Value::as_str) != Some("result") {
            continue;
        }
        let cost = event
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let bucket = summary.by_instance.entry(instance.to_string()).or_default();
        bucket.calls += 1;
        if instance != main_instance {
            bucket.cost_usd += cost;
            summary.total_cost_usd += cost;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_log(lines: &[Value]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.log.json");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        (dir, path)
    }

    fn result_entry(instance: &str, cost: f64) -> Value {
        json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "instance": instance,
            "instance_id": format!("{instance}_00000000"),
            "calling_instance": "lead",
            "calling_instance_id": "lead_00000000",
            "event": {"type": "result", "result": "ok", "total_cost_usd": cost},
        })
    }

    #[test]
    fn test_sums_result_events_and_excludes_root() {
        let (_dir, path) = write_log(&[
            result_entry("backend", 0.25),
            result_entry("backend", 0.50),
            result_entry("frontend", 0.10),
            result_entry("lead", 42.0),
        ]);

        let summary = aggregate_session_cost(&path, "lead").unwrap();
        assert!((summary.total_cost_usd - 0.85).abs() < 1e-9);
        assert_eq!(summary.by_instance["backend"].calls, 2);
        assert!((summary.by_instance["backend"].cost_usd - 0.75).abs() < 1e-9);
        // The root's calls are counted but contribute no cost.
        assert_eq!(summary.by_instance["lead"].calls, 1);
        assert_eq!(summary.by_instance["lead"].cost_usd, 0.0);
    }

    #[test]
    fn test_non_result_events_ignored() {
        let (_dir, path) = write_log(&[
            json!({
                "instance": "backend",
                "event": {"type": "assistant", "total_cost_usd": 99.0},
            }),
            result_entry("backend", 0.1),
        ]);
        let summary = aggregate_session_cost(&path, "lead").unwrap();
        assert!((summary.total_cost_usd - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.log.json");
        std::fs::write(&path, "not json\n{\"instance\":\"x\"}\n").unwrap();
        let summary = aggregate_session_cost(&path, "lead").unwrap();
        assert_eq!(summary.total_cost_usd, 0.0);
    }

    #[test]
    fn test_missing_log_is_zero() {
        let dir = tempdir().unwrap();
        let summary =
            aggregate_session_cost(&dir.path().join("absent.json"), "lead").unwrap();
        assert_eq!(summary.total_cost_usd, 0.0);
        assert!(summary.by_instance.is_empty());
    }

    #[test]
    fn test_render_marks_root_interactive() {
        let (_dir, path) = write_log(&[result_entry("lead", 1.0), result_entry("backend", 0.5)]);
        let summary = aggregate_session_cost(&path, "lead").unwrap();
        let rendered = summary.render();
        assert!(rendered.contains("lead: interactive"));
        assert!(rendered.contains("backend: $0.5000 (1 calls)"));
        assert!(rendered.contains("Total cost: $0.5000"));
    }
}
