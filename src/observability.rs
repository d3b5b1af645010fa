//! Observability: tracing init and the JSONL audit log.
//!
//! Audit log path: SKILLBOX_AUDIT_LOG. Audit writes are best-effort and
//! never fail the request.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config;

/// Initialize tracing. Call once at process startup.
/// SKILLBOX_QUIET=1 raises the filter to warn (the IPC daemon sets it so
/// stdout/stderr stay clean for the wire protocol).
pub fn init_tracing() {
    let level = if config::quiet() {
        "agentskill=warn".to_string()
    } else {
        env::var("SKILLBOX_LOG_LEVEL").unwrap_or_else(|_| "agentskill=info".to_string())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_output = config::parse_bool_env("SKILLBOX_LOG_JSON", false);

    let _ = if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    };
}

fn audit_path() -> Option<String> {
    let path = env::var("SKILLBOX_AUDIT_LOG").ok()?;
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    Some(path)
}

fn append_jsonl(record: &serde_json::Value) {
    let Some(path) = audit_path() else {
        return;
    };
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// A security scan flagged high-severity findings and asked for confirmation.
pub fn audit_confirmation_requested(skill: &str, code_hash: &str, findings: usize, severity: &str) {
    append_jsonl(&json!({
        "ts": Utc::now().to_rfc3339(),
        "event": "confirmation_requested",
        "skill": skill,
        "code_hash": code_hash,
        "findings": findings,
        "severity": severity,
    }));
}

/// The confirmation was answered. `source` is "caller", "auto", or "env".
pub fn audit_confirmation_response(skill: &str, approved: bool, source: &str) {
    append_jsonl(&json!({
        "ts": Utc::now().to_rfc3339(),
        "event": "confirmation_response",
        "skill": skill,
        "approved": approved,
        "source": source,
    }));
}

pub fn audit_command_invoked(skill: &str, entry: &str, skill_dir: &str) {
    append_jsonl(&json!({
        "ts": Utc::now().to_rfc3339(),
        "event": "command_invoked",
        "skill": skill,
        "entry": entry,
        "skill_dir": skill_dir,
    }));
}

pub fn audit_execution_completed(skill: &str, exit_code: i32, duration_ms: u64, stdout_len: usize) {
    append_jsonl(&json!({
        "ts": Utc::now().to_rfc3339(),
        "event": "execution_completed",
        "skill": skill,
        "exit_code": exit_code,
        "duration_ms": duration_ms,
        "stdout_len": stdout_len,
    }));
}
