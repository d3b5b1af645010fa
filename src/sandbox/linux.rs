#![cfg(target_os = "linux")]

//! Linux backend: bubblewrap when available, direct namespace unsharing
//! as the fallback. Both enter fresh user/mount/PID/UTS/IPC namespaces;
//! the network namespace is unshared unless the spec allows network.

use crate::sandbox::common::{feed_stdin, set_process_group, wait_with_timeout, LaunchSpec, RawExec};
use crate::sandbox::context::ResourceLimits;
use crate::sandbox::seatbelt::{
    DENY_DIRECTORIES, DENY_GIT_CONFIGS, DENY_PACKAGE_CONFIGS, DENY_SECURITY_FILES,
    DENY_SHELL_CONFIGS,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Execute a launch spec in the Linux sandbox.
pub fn execute_sandboxed(spec: &LaunchSpec, limits: ResourceLimits) -> Result<RawExec> {
    if let Some(bwrap) = find_tool("bwrap") {
        return execute_with_bwrap(&bwrap, spec, limits);
    }
    tracing::debug!("bwrap not found, falling back to direct namespace unsharing");
    execute_with_namespaces(spec, limits)
}

fn find_tool(name: &str) -> Option<PathBuf> {
    let out = Command::new("which").arg(name).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn execute_with_bwrap(bwrap: &Path, spec: &LaunchSpec, limits: ResourceLimits) -> Result<RawExec> {
    let work_dir = TempDir::new()?;

    let mut cmd = Command::new(bwrap);
    cmd.args(["--unshare-all", "--die-with-parent"]);

    // Minimal read-only system image
    cmd.args(["--ro-bind", "/usr", "/usr"]);
    for dir in ["/lib", "/lib64", "/bin", "/sbin"] {
        if Path::new(dir).exists() {
            cmd.args(["--ro-bind", dir, dir]);
        }
    }

    cmd.args(["--dir", "/home"]);
    cmd.args(["--dir", "/root"]);

    for root in &spec.read_roots {
        if root.as_os_str().is_empty() || !root.exists() {
            continue;
        }
        cmd.arg("--ro-bind").arg(root).arg(root);
    }
    for root in &spec.write_roots {
        if root.as_os_str().is_empty() || !root.exists() {
            continue;
        }
        cmd.arg("--bind").arg(root).arg(root);
    }

    // Private /tmp backed by the monitored work dir
    cmd.arg("--bind").arg(work_dir.path()).arg("/tmp");
    cmd.args(["--dev", "/dev"]);
    cmd.args(["--proc", "/proc"]);

    if spec.allow_network {
        cmd.args(["--share-net"]);
    }
    // --unshare-all already removed the network namespace otherwise

    for (key, value) in &spec.env {
        cmd.arg("--setenv").arg(key).arg(value);
    }
    // Inside the sandbox the private /tmp is the only scratch space
    cmd.args(["--setenv", "SKILLBOX_SANDBOX", "1"]);
    cmd.args(["--setenv", "TMPDIR", "/tmp"]);
    cmd.args(["--setenv", "HOME", "/tmp"]);

    // Shadow credential/config directories with empty tmpfs and mask the
    // protected files with /dev/null
    if let Ok(home) = std::env::var("HOME") {
        for dir in DENY_DIRECTORIES {
            let full = Path::new(&home).join(dir);
            if full.exists() {
                cmd.arg("--tmpfs").arg(&full);
            }
        }
        for file in DENY_SHELL_CONFIGS
            .iter()
            .chain(DENY_GIT_CONFIGS)
            .chain(DENY_PACKAGE_CONFIGS)
            .chain(DENY_SECURITY_FILES)
        {
            let full = Path::new(&home).join(file);
            if full.is_file() {
                cmd.arg("--ro-bind").arg("/dev/null").arg(&full);
            }
        }
    }

    cmd.arg("--");
    cmd.arg(&spec.program);
    cmd.args(&spec.args);

    if !spec.cwd.as_os_str().is_empty() {
        cmd.current_dir(&spec.cwd);
    }

    cmd.stdin(if spec.stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    set_process_group(&mut cmd);
    let mut child = cmd.spawn().context("Failed to spawn bwrap sandbox")?;
    feed_stdin(&mut child, spec.stdin_data.as_deref());
    wait_with_timeout(child, limits.timeout_secs, limits.max_memory_bytes())
}

/// Fallback: unshare namespaces in the child before exec. User namespaces
/// keep this unprivileged; capabilities in the new user namespace are not
/// granted to the exec'd interpreter.
fn execute_with_namespaces(spec: &LaunchSpec, limits: ResourceLimits) -> Result<RawExec> {
    use nix::sched::{unshare, CloneFlags};
    use std::os::unix::process::CommandExt;

    let work_dir = TempDir::new()?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if !spec.cwd.as_os_str().is_empty() {
        cmd.current_dir(&spec.cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.env("SKILLBOX_SANDBOX", "1");
    cmd.env("TMPDIR", work_dir.path());

    cmd.stdin(if spec.stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let allow_network = spec.allow_network;
    let memory_limit_bytes = limits.max_memory_bytes();
    unsafe {
        cmd.pre_exec(move || {
            let mut flags = CloneFlags::CLONE_NEWUSER
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWPID
                | CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWIPC;
            if !allow_network {
                flags |= CloneFlags::CLONE_NEWNET;
            }
            unshare(flags).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::Other, format!("unshare failed: {}", e))
            })?;

            let mem = libc::rlimit {
                rlim_cur: memory_limit_bytes,
                rlim_max: memory_limit_bytes,
            };
            libc::setrlimit(libc::RLIMIT_AS, &mem);
            Ok(())
        });
    }

    set_process_group(&mut cmd);
    let mut child = cmd.spawn().context("Failed to spawn namespaced child")?;
    feed_stdin(&mut child, spec.stdin_data.as_deref());
    wait_with_timeout(child, limits.timeout_secs, limits.max_memory_bytes())
}
