//! Dual session log: human-framed `session.log` and JSON-lines
//! `session.log.json`.
//!
//! One logger per process. Appends rely on OS line-atomic semantics for
//! cross-process interleaving; within a process each file is behind a mutex.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::paths::SessionPaths;

#[derive(Debug)]
pub struct SessionLogger {
    human: Mutex<File>,
    json: Mutex<File>,
    instance: String,
    instance_id: String,
    calling_instance: Option<String>,
    calling_instance_id: Option<String>,
}

impl SessionLogger {
    pub fn new(
        session: &SessionPaths,
        instance: &str,
        instance_id: &str,
        calling_instance: Option<&str>,
        calling_instance_id: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            human: Mutex::new(open_append(&session.log_path())?),
            json: Mutex::new(open_append(&session.json_log_path())?),
            instance: instance.to_string(),
            instance_id: instance_id.to_string(),
            calling_instance: calling_instance.map(str::to_string),
            calling_instance_id: calling_instance_id.map(str::to_string),
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Caller name for human framing; the orchestrator itself logs as "user".
    fn caller(&self) -> &str {
        self.calling_instance.as_deref().unwrap_or("user")
    }

    /// An inbound task request: `<caller> -> <callee>:` plus the prompt.
    pub fn log_request(&self, prompt: &str) {
        self.append_human(&format!(
            "{} -> {}:\n{}",
            self.caller(),
            self.instance,
            indent(prompt)
        ));
        self.append_json(json!({"type": "request", "prompt": prompt}));
    }

    /// The terminal result event: `($<cost> - <ms>ms) <callee> -> <caller>:`.
    ///
    /// The raw provider event is passed through to the JSON log so cost
    /// aggregation sees `total_cost_usd` untouched.
    pub fn log_response(&self, event: &Value) {
        let cost = event
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .map(|c| format!("{c:.6}"))
            .unwrap_or_else(|| "n/a".to_string());
        let duration = event
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let text = event.get("result").and_then(Value::as_str).unwrap_or("");
        self.append_human(&format!(
            "(${cost} - {duration}ms) {} -> {}:\n{}",
            self.instance,
            self.caller(),
            indent(text)
        ));
        self.append_json(event.clone());
    }

    /// A provider stream event. Assistant text and tool calls get human
    /// lines; every event is passed through to the JSON log verbatim.
    pub fn log_stream_event(&self, event: &Value) {
        if event.get("type").and_then(Value::as_str) == Some("assistant") {
            self.log_assistant_human(event);
        }
        self.append_json(event.clone());
    }

    /// An orchestrator-level note (cleanup warnings, lifecycle messages).
    pub fn log_system(&self, message: &str) {
        self.append_human(message);
        self.append_json(json!({"type": "system", "message": message}));
    }

    fn log_assistant_human(&self, event: &Value) {
        let Some(blocks) = event
            .pointer("/message/content")
            .and_then(Value::as_array)
        else {
            return;
        };
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        self.append_human(&format!("{}:\n{}", self.instance, indent(text)));
                    }
                }
                Some("tool_use") => {
                    let tool = block.get("name").and_then(Value::as_str).unwrap_or("?");
                    let input = block
                        .get("input")
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    self.append_human(&format!(
                        "{} calling tool [{tool}]: {input}",
                        self.instance
                    ));
                }
                _ => {}
            }
        }
    }

    fn append_human(&self, text: &str) {
        let Ok(mut file) = self.human.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{text}\n") {
            tracing::warn!(error = %e, "failed to append to session.log");
        }
    }

    fn append_json(&self, event: Value) {
        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "instance": self.instance,
            "instance_id": self.instance_id,
            "calling_instance": self.calling_instance,
            "calling_instance_id": self.calling_instance_id,
            "event": event,
        });
        let Ok(mut file) = self.json.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{entry}") {
            tracing::warn!(error = %e, "failed to append to session.log.json");
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
