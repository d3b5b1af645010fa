#![cfg(target_os = "macos")]

//! macOS backend: wrap the interpreter under `sandbox-exec` with a
//! generated Seatbelt profile.

use crate::sandbox::common::{
    feed_stdin, set_process_group, wait_with_timeout, LaunchSpec, RawExec, DEFAULT_MAX_PROCESSES,
};
use crate::sandbox::context::ResourceLimits;
use crate::sandbox::seatbelt::generate_profile;
use anyhow::{Context, Result};
use std::fs;
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Execute a launch spec inside the Seatbelt sandbox.
pub fn execute_sandboxed(spec: &LaunchSpec, limits: ResourceLimits) -> Result<RawExec> {
    use std::os::unix::process::CommandExt;

    let profile_dir = TempDir::new()?;
    let profile_path = profile_dir.path().join("sandbox.sb");
    fs::write(&profile_path, generate_profile(spec))?;

    let mut cmd = Command::new("sandbox-exec");
    cmd.arg("-f").arg(&profile_path);
    cmd.arg(&spec.program);
    cmd.args(&spec.args);

    if !spec.cwd.as_os_str().is_empty() {
        cmd.current_dir(&spec.cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.env("SKILLBOX_SANDBOX", "1");

    cmd.stdin(if spec.stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // rlimits in the child before exec: address space and process count
    let memory_limit_bytes = limits.max_memory_bytes();
    unsafe {
        cmd.pre_exec(move || {
            let mem = libc::rlimit {
                rlim_cur: memory_limit_bytes,
                rlim_max: memory_limit_bytes,
            };
            libc::setrlimit(libc::RLIMIT_AS, &mem);

            let nproc = libc::rlimit {
                rlim_cur: DEFAULT_MAX_PROCESSES,
                rlim_max: DEFAULT_MAX_PROCESSES,
            };
            libc::setrlimit(libc::RLIMIT_NPROC, &nproc);
            Ok(())
        });
    }

    set_process_group(&mut cmd);
    let mut child = cmd.spawn().context("Failed to spawn sandbox-exec")?;
    feed_stdin(&mut child, spec.stdin_data.as_deref());
    wait_with_timeout(child, limits.timeout_secs, memory_limit_bytes)
}
