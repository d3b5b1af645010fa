//! Shared process plumbing for the sandbox backends: launch description,
//! output capture, and resource-limit enforcement on a running child.

use anyhow::Result;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Memory check interval in milliseconds
pub const MEMORY_CHECK_INTERVAL_MS: u64 = 100;

/// Grace period between SIGTERM and SIGKILL
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Max processes in the sandbox (fork bomb protection)
pub const DEFAULT_MAX_PROCESSES: u64 = 50;

/// A fully described child invocation, isolation-agnostic. Backends wrap
/// it in their platform sandbox; level 1 runs it directly.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Data piped to the child's stdin, then closed
    pub stdin_data: Option<String>,
    /// Directories the sandbox must allow reading
    pub read_roots: Vec<PathBuf>,
    /// Directories the sandbox must allow writing
    pub write_roots: Vec<PathBuf>,
    pub allow_network: bool,
}

/// Why a child was killed by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    MemoryLimit,
}

/// Raw result of one child process
#[derive(Debug)]
pub struct RawExec {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub kill_reason: Option<KillReason>,
}

/// RSS of a process in bytes, from `/proc/<pid>/status`
#[cfg(target_os = "linux")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// RSS of a process in bytes, via `ps`
#[cfg(target_os = "macos")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let kb: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}

/// Put the child in its own process group so resource-limit kills reach
/// its whole descendant tree, not just the immediate child. Without this
/// a timed-out `sh` leaves grandchildren holding the output pipes open.
#[cfg(unix)]
pub fn set_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    let target = Pid::from_raw(pid as i32);
    if killpg(target, Signal::SIGTERM).is_err() {
        let _ = kill(target, Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Monitor a child until exit, timeout, or memory violation.
///
/// Output is drained concurrently so a chatty child never deadlocks on a
/// full pipe. A violating child gets SIGTERM, a 1 s grace window, then
/// SIGKILL. Timeout kills report exit code 124.
pub fn wait_with_timeout(
    mut child: Child,
    timeout_secs: u64,
    memory_limit_bytes: u64,
) -> Result<RawExec> {
    let stdout_handle = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let collect = |h: Option<thread::JoinHandle<String>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };

    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let pid = child.id();

    let kill_reason = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(RawExec {
                    stdout: collect(stdout_handle),
                    stderr: collect(stderr_handle),
                    exit_code: status.code().unwrap_or(-1),
                    kill_reason: None,
                });
            }
            Ok(None) => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to wait for process: {}", e)),
        }

        if start.elapsed() > timeout {
            break KillReason::Timeout;
        }
        if let Some(memory) = get_process_memory(pid) {
            if memory > memory_limit_bytes {
                break KillReason::MemoryLimit;
            }
        }
        thread::sleep(Duration::from_millis(MEMORY_CHECK_INTERVAL_MS));
    };

    // SIGTERM, grace window, then SIGKILL
    terminate(pid);
    let grace_start = Instant::now();
    while grace_start.elapsed() < KILL_GRACE {
        if let Ok(Some(_)) = child.try_wait() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    force_kill(&mut child);

    let (exit_code, stderr_note) = match kill_reason {
        KillReason::Timeout => (
            124,
            crate::error::EngineError::Timeout(timeout_secs).to_string(),
        ),
        KillReason::MemoryLimit => (
            -1,
            crate::error::EngineError::MemoryLimitExceeded(memory_limit_bytes / (1024 * 1024))
                .to_string(),
        ),
    };

    let mut stderr = collect(stderr_handle);
    if !stderr.is_empty() {
        stderr.push('\n');
    }
    stderr.push_str(&stderr_note);

    Ok(RawExec {
        stdout: collect(stdout_handle),
        stderr,
        exit_code,
        kill_reason: Some(kill_reason),
    })
}

/// Spawn a launch spec directly (level 1): no isolation, limits only.
/// Network denial here is best-effort env scrubbing.
pub fn execute_direct(spec: &LaunchSpec, timeout_secs: u64, memory_limit_bytes: u64) -> Result<RawExec> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if spec.cwd.as_os_str().is_empty() {
        // inherit parent cwd
    } else {
        cmd.current_dir(&spec.cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.env("SKILLBOX_SANDBOX", "0");

    if !spec.allow_network {
        for key in [
            "HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY", "http_proxy", "https_proxy", "all_proxy",
        ] {
            cmd.env_remove(key);
        }
        cmd.env("SKILLBOX_NETWORK_DISABLED", "1");
    }

    cmd.stdin(if spec.stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    set_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| {
        crate::error::EngineError::SubprocessCrash(format!(
            "failed to spawn {}: {}",
            spec.program.display(),
            e
        ))
    })?;

    feed_stdin(&mut child, spec.stdin_data.as_deref());
    wait_with_timeout(child, timeout_secs, memory_limit_bytes)
}

/// Write the input to the child's stdin from a separate thread, then close
/// the pipe. Writing off-thread avoids a deadlock when a large input fills
/// the stdin pipe while the child is already producing output. A child
/// that exits without reading its stdin is not an error.
pub fn feed_stdin(child: &mut Child, data: Option<&str>) {
    if let (Some(mut stdin), Some(data)) = (child.stdin.take(), data) {
        let data = data.to_string();
        thread::spawn(move || {
            let _ = stdin.write_all(data.as_bytes());
        });
    }
}
