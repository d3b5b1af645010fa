//! IPC daemon: JSON-RPC 2.0 over stdio, one request or response per line.
//!
//! One reader thread parses requests and hands them to a fixed worker
//! pool; a writer thread serialises responses. In-flight permits bound
//! the queue, so a flooded daemon stops reading and the caller feels
//! pipe back-pressure. Responses correlate by `id`; there is no FIFO
//! guarantee across workers.

use crate::config;
use crate::dispatch::{self, RunOptions, Services};
use crate::error;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

/// Maximum request line size (10 MiB): oversized lines are rejected, not
/// buffered.
const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// One response on its way to the writer thread
enum Outgoing {
    Result { id: Value, result: Value },
    Error { id: Value, code: i64, message: String },
}

/// Run the daemon until stdin closes. Pending requests drain before exit.
pub fn serve_stdio() -> Result<()> {
    // The wire protocol owns stdout; keep diagnostics quiet
    std::env::set_var("SKILLBOX_QUIET", "1");

    let services = Arc::new(Services::new());
    let pool_size = config::ipc_pool_size().max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build()
        .map_err(|e| crate::error::EngineError::InternalError(format!("worker pool: {}", e)))?;

    let (resp_tx, resp_rx) = mpsc::channel::<Outgoing>();

    // Writer thread: stdout is not shareable across workers
    let writer_handle = thread::spawn(move || -> Result<()> {
        let mut stdout = io::stdout();
        for outgoing in resp_rx {
            let resp = match outgoing {
                Outgoing::Result { id, result } => {
                    json!({"jsonrpc": "2.0", "id": id, "result": result})
                }
                Outgoing::Error { id, code, message } => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message}
                }),
            };
            writeln!(stdout, "{}", resp)?;
            stdout.flush()?;
        }
        Ok(())
    });

    // Bounded in-flight permits: the reader blocks here when the pool and
    // queue are saturated
    let (permit_tx, permit_rx) = mpsc::sync_channel::<()>(pool_size * 2);
    let permit_rx = Arc::new(Mutex::new(permit_rx));

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let mut pending = 0usize;

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    loop {
        let line = match read_line_limited(&mut reader) {
            Ok(None) => break, // EOF
            Ok(Some(l)) => l,
            Err(e) => {
                let _ = resp_tx.send(Outgoing::Error {
                    id: Value::Null,
                    code: -32600,
                    message: format!("Invalid request: {}", e),
                });
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                let _ = resp_tx.send(Outgoing::Error {
                    id: Value::Null,
                    code: -32700,
                    message: format!("Parse error: {}", e),
                });
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let params = request
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        if !is_known_method(&method) {
            let _ = resp_tx.send(Outgoing::Error {
                id,
                code: -32601,
                message: format!("Method not found: {}", method),
            });
            continue;
        }

        permit_tx
            .send(())
            .map_err(|_| anyhow::anyhow!("permit channel closed"))?;
        pending += 1;

        let services = Arc::clone(&services);
        let resp_tx = resp_tx.clone();
        let done_tx = done_tx.clone();
        let permit_rx = Arc::clone(&permit_rx);
        pool.spawn(move || {
            let outgoing = match handle_request(&services, &method, &params) {
                Ok(result) => Outgoing::Result { id, result },
                Err(e) => Outgoing::Error {
                    id,
                    code: -32603,
                    message: e.to_string(),
                },
            };
            let _ = resp_tx.send(outgoing);
            if let Ok(rx) = permit_rx.lock() {
                let _ = rx.recv();
            }
            let _ = done_tx.send(());
        });
    }

    // Drain in-flight work, then let the writer finish
    for _ in 0..pending {
        let _ = done_rx.recv();
    }
    drop(resp_tx);
    writer_handle
        .join()
        .map_err(|_| anyhow::anyhow!("Writer thread panicked"))??;

    Ok(())
}

fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        "run" | "exec" | "bash" | "list_tools" | "list_tools_with_meta"
    )
}

/// Read one line, enforcing [`MAX_REQUEST_SIZE`]. `Ok(None)` on EOF.
fn read_line_limited(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return if buf.is_empty() {
                Ok(None)
            } else {
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                String::from_utf8(buf)
                    .map(Some)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8"))
            };
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > MAX_REQUEST_SIZE {
                    reader.consume(pos + 1);
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Request exceeds 10MB size limit",
                    ));
                }
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                return String::from_utf8(buf)
                    .map(Some)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8"));
            }
            None => {
                let len = available.len();
                if buf.len() + len > MAX_REQUEST_SIZE {
                    reader.consume(len);
                    skip_until_newline(reader);
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Request exceeds 10MB size limit",
                    ));
                }
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

fn skip_until_newline(reader: &mut impl BufRead) {
    loop {
        match reader.fill_buf() {
            Ok(b) if b.is_empty() => break,
            Ok(b) => {
                if let Some(pos) = b.iter().position(|&c| c == b'\n') {
                    reader.consume(pos + 1);
                    break;
                }
                let len = b.len();
                reader.consume(len);
            }
            Err(_) => break,
        }
    }
}

/// Dispatch one request to its handler. Gated and protocol-coded failures
/// (soft risk, hard block, expired scan, timeout) come back as results
/// carrying their exit code; everything else becomes an RPC error.
fn handle_request(services: &Services, method: &str, params: &Value) -> Result<Value> {
    match method {
        "run" => handle_run(services, params),
        "exec" => handle_exec(services, params),
        "bash" => handle_bash(services, params),
        "list_tools" => handle_list_tools(params, false),
        "list_tools_with_meta" => handle_list_tools(params, true),
        other => anyhow::bail!("Method not found: {}", other),
    }
}

fn parse_run_options(p: &serde_json::Map<String, Value>) -> RunOptions {
    RunOptions {
        allow_network: p
            .get("allow_network")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        cache_dir: p
            .get("cache_dir")
            .and_then(Value::as_str)
            .map(String::from),
        max_memory: p.get("max_memory").and_then(Value::as_u64),
        timeout: p.get("timeout").and_then(Value::as_u64),
        sandbox_level: p
            .get("sandbox_level")
            .and_then(Value::as_u64)
            .map(|u| u as u8),
        allow_unknown_packages: p
            .get("allow_unknown_packages")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        confirmed: p.get("confirmed").and_then(Value::as_bool).unwrap_or(false),
        scan_id: p.get("scan_id").and_then(Value::as_str).map(String::from),
    }
}

/// Convert handler failures whose exit code is protocol-stable into result
/// objects; leave the rest as errors.
fn coded_result(err: anyhow::Error) -> Result<Value> {
    let code = error::exit_code_for(&err);
    if code != 1 {
        return Ok(json!({
            "output": "",
            "exit_code": code,
            "error": err.to_string(),
        }));
    }
    Err(err)
}

fn handle_run(services: &Services, params: &Value) -> Result<Value> {
    let p = params.as_object().context("params must be an object")?;
    let skill_dir = p
        .get("skill_dir")
        .and_then(Value::as_str)
        .context("skill_dir required")?;
    let input_json = p
        .get("input_json")
        .and_then(Value::as_str)
        .context("input_json required")?;
    let opts = parse_run_options(p);

    match dispatch::run_skill(services, skill_dir, input_json, &opts) {
        Ok(outcome) => Ok(json!({
            "output": outcome.output,
            "exit_code": outcome.exit_code,
        })),
        Err(e) => coded_result(e),
    }
}

fn handle_exec(services: &Services, params: &Value) -> Result<Value> {
    let p = params.as_object().context("params must be an object")?;
    let skill_dir = p
        .get("skill_dir")
        .and_then(Value::as_str)
        .context("skill_dir required")?;
    let script_path = p
        .get("script_path")
        .and_then(Value::as_str)
        .context("script_path required")?;
    let input_json = p
        .get("input_json")
        .and_then(Value::as_str)
        .context("input_json required")?;
    let args = p.get("args").and_then(Value::as_str);
    let opts = parse_run_options(p);

    match dispatch::exec_script(services, skill_dir, script_path, input_json, args, &opts) {
        Ok(outcome) => Ok(json!({
            "output": outcome.output,
            "exit_code": outcome.exit_code,
        })),
        Err(e) => coded_result(e),
    }
}

fn handle_bash(services: &Services, params: &Value) -> Result<Value> {
    let p = params.as_object().context("params must be an object")?;
    let skill_dir = p
        .get("skill_dir")
        .and_then(Value::as_str)
        .context("skill_dir required")?;
    let command = p
        .get("command")
        .and_then(Value::as_str)
        .context("command required")?;
    let cache_dir = p.get("cache_dir").and_then(Value::as_str);
    let timeout = p.get("timeout").and_then(Value::as_u64);
    let cwd = p.get("cwd").and_then(Value::as_str);

    match dispatch::bash_command(services, skill_dir, command, cache_dir, timeout, cwd) {
        Ok(outcome) => {
            // Completed bash results are already structured
            // {stdout, stderr, exit_code}; gated scan reports are not and
            // keep their protocol exit code
            match serde_json::from_str::<Value>(&outcome.output) {
                Ok(v) if v.get("exit_code").is_some() => Ok(v),
                _ => Ok(json!({
                    "output": outcome.output,
                    "exit_code": outcome.exit_code,
                })),
            }
        }
        Err(e) => coded_result(e),
    }
}

fn handle_list_tools(params: &Value, with_meta: bool) -> Result<Value> {
    let p = params.as_object().context("params must be an object")?;
    let skills_dir = p
        .get("skills_dir")
        .and_then(Value::as_str)
        .context("skills_dir required")?;
    let filter: Option<Vec<String>> = p.get("skills").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    });

    let mut skills = dispatch::list_skills(skills_dir)?;
    if let Some(filter) = filter {
        skills.retain(|s| filter.contains(&s.name));
    }

    let (tools, tool_meta) = dispatch::tool_definitions(&skills);
    if with_meta {
        Ok(json!({ "tools": tools, "tool_meta": tool_meta }))
    } else {
        Ok(json!({ "tools": tools }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_line_limited_basic() {
        let mut reader = Cursor::new(b"first\nsecond\r\n".to_vec());
        assert_eq!(read_line_limited(&mut reader).unwrap().unwrap(), "first");
        assert_eq!(read_line_limited(&mut reader).unwrap().unwrap(), "second");
        assert!(read_line_limited(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_read_line_limited_eof_without_newline() {
        let mut reader = Cursor::new(b"tail".to_vec());
        assert_eq!(read_line_limited(&mut reader).unwrap().unwrap(), "tail");
        assert!(read_line_limited(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_known_methods() {
        for m in ["run", "exec", "bash", "list_tools", "list_tools_with_meta"] {
            assert!(is_known_method(m));
        }
        assert!(!is_known_method("session_create"));
        assert!(!is_known_method(""));
    }

    #[test]
    fn test_coded_result_maps_protocol_codes() {
        let v = coded_result(crate::error::EngineError::ExpiredScan.into()).unwrap();
        assert_eq!(v["exit_code"], 3);

        let v = coded_result(crate::error::EngineError::HardBlocked.into()).unwrap();
        assert_eq!(v["exit_code"], 4);

        // Generic failures stay errors
        assert!(coded_result(anyhow::anyhow!("boom")).is_err());
    }

    #[test]
    fn test_handle_request_missing_params() {
        let services = Services::new();
        let err = handle_request(&services, "run", &json!({})).unwrap_err();
        assert!(err.to_string().contains("skill_dir"));
    }

    #[test]
    fn test_handle_list_tools() {
        let _guard = crate::config::TEST_ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let tmp = tempfile::TempDir::new().unwrap();
        std::env::set_var("SKILLBOX_SKILLS_ROOT", tmp.path());

        let dir = tmp.path().join("hello-skill");
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(dir.join("scripts/main.py"), "").unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            "---\nname: hello-skill\ndescription: Greets\n---\n",
        )
        .unwrap();

        let params = json!({"skills_dir": tmp.path().to_string_lossy()});
        let result = handle_list_tools(&params, true).unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 1);
        assert!(result["tool_meta"]["hello_skill"]["skill_dir"]
            .as_str()
            .unwrap()
            .contains("hello-skill"));

        std::env::remove_var("SKILLBOX_SKILLS_ROOT");
    }
}
