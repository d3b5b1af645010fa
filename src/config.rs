//! Environment-variable configuration layer.
//!
//! Priority everywhere: per-call override > environment > default.

use std::env;
use std::path::PathBuf;

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default maximum memory limit in MB
pub const DEFAULT_MAX_MEMORY_MB: u64 = 512;

/// Default IPC daemon worker pool size
pub const DEFAULT_IPC_POOL_SIZE: usize = 10;

/// Parse a boolean environment variable.
/// Accepts true/false/1/0/yes/no/on/off, case-insensitive.
pub fn parse_bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_u64_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn timeout_secs() -> u64 {
    parse_u64_env("SKILLBOX_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)
}

pub fn max_memory_mb() -> u64 {
    parse_u64_env("SKILLBOX_MAX_MEMORY_MB", DEFAULT_MAX_MEMORY_MB)
}

pub fn ipc_pool_size() -> usize {
    parse_u64_env("SKILLBOX_IPC_POOL_SIZE", DEFAULT_IPC_POOL_SIZE as u64) as usize
}

/// Whether OS-level sandboxing is enabled at all.
/// `SKILLBOX_ENABLE_SANDBOX=false` forces level 1 regardless of requests.
pub fn sandbox_enabled() -> bool {
    parse_bool_env("SKILLBOX_ENABLE_SANDBOX", true)
}

pub fn auto_approve() -> bool {
    parse_bool_env("SKILLBOX_AUTO_APPROVE", false)
}

pub fn allow_network() -> bool {
    parse_bool_env("SKILLBOX_ALLOW_NETWORK", false)
}

pub fn quiet() -> bool {
    parse_bool_env("SKILLBOX_QUIET", false)
}

/// Root directory that externally supplied skill/script paths must stay
/// under. Defaults to the current working directory.
pub fn skills_root() -> PathBuf {
    env::var("SKILLBOX_SKILLS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Directory skills may write output files to, in addition to the OS temp
/// directory. Unset means temp-only.
pub fn output_dir() -> Option<PathBuf> {
    env::var("SKILLBOX_OUTPUT_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
}

/// Base directory for the shared environment cache.
/// `AGENTSKILL_CACHE_DIR` overrides the OS cache dir.
pub fn cache_base_dir() -> PathBuf {
    if let Ok(dir) = env::var("AGENTSKILL_CACHE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir).join("agentskill").join("envs");
        }
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("agentskill")
        .join("envs")
}

/// Serialises tests that mutate process-wide environment variables.
#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
