//! Content-addressed environment builder.
//!
//! One environment per package set, shared across skills. An environment
//! is usable iff it carries the `.agentskill_complete` sentinel; a
//! directory without it is a failed or in-progress build and is treated as
//! absent. Concurrent builders for the same key converge by building into
//! a private sibling directory and atomically renaming it into place; the
//! loser of the race discards its build and uses the winner's.

use crate::config;
use crate::error::EngineError;
use crate::skill::metadata::Language;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Sentinel written only after a successful install.
pub const COMPLETE_MARKER: &str = ".agentskill_complete";

/// Per-env marker that the Chromium bundle has been fetched.
pub const PLAYWRIGHT_MARKER: &str = ".playwright_chromium_done";

const PLAYWRIGHT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// SHA-256 over the sorted package list, one name per line.
/// Order-insensitive: `[a, b]` and `[b, a]` hash identically.
pub fn compute_packages_hash(packages: &[String]) -> String {
    let mut sorted: Vec<&String> = packages.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for pkg in sorted {
        hasher.update(pkg.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Cache key: `<prefix>-<hex16>`, or `<prefix>-none` for an empty set.
pub fn cache_key(language: Language, packages: &[String]) -> String {
    let prefix = match language {
        Language::Python => "py",
        Language::Node => "node",
        other => other.as_str(),
    };
    if packages.is_empty() {
        return format!("{}-none", prefix);
    }
    format!("{}-{}", prefix, &compute_packages_hash(packages)[..16])
}

/// Packages declared by skill-local files when no lockfile/whitelist
/// resolution applies: `requirements.txt` lines for Python,
/// `package.json` dependencies for Node.
pub fn packages_from_skill_files(skill_dir: &Path, language: Language) -> Vec<String> {
    match language {
        Language::Python => {
            let Ok(content) = fs::read_to_string(skill_dir.join("requirements.txt")) else {
                return Vec::new();
            };
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect()
        }
        Language::Node => {
            let Ok(content) = fs::read_to_string(skill_dir.join("package.json")) else {
                return Vec::new();
            };
            let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&content) else {
                return Vec::new();
            };
            pkg.get("dependencies")
                .and_then(|d| d.as_object())
                .map(|deps| {
                    deps.iter()
                        .map(|(name, version)| match version.as_str() {
                            Some(v) if v != "*" && !v.is_empty() => format!("{}@{}", name, v),
                            _ => name.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Ensure the environment for `(language, packages)` exists and return its
/// path. Bash and unknown languages need no environment (empty path).
pub fn ensure_environment(
    language: Language,
    packages: &[String],
    cache_dir_override: Option<&str>,
) -> Result<PathBuf> {
    if !matches!(language, Language::Python | Language::Node) {
        return Ok(PathBuf::new());
    }

    let base = cache_dir_override
        .map(|d| PathBuf::from(d).join("agentskill").join("envs"))
        .unwrap_or_else(config::cache_base_dir);
    fs::create_dir_all(&base).context("Create env cache dir")?;

    let key = cache_key(language, packages);
    let env_path = base.join(&key);

    // Fast path: sentinel present means the environment is complete.
    if env_path.join(COMPLETE_MARKER).exists() {
        if language == Language::Python {
            ensure_playwright_chromium(&env_path, packages)?;
        }
        return Ok(env_path);
    }

    // A directory without the sentinel is a dead partial build.
    if env_path.exists() {
        tracing::warn!("Purging incomplete environment: {}", env_path.display());
        fs::remove_dir_all(&env_path).context("Purge partial env")?;
    }

    // Build privately, then rename into place.
    let build_path = base.join(format!(".{}.build-{}", key, std::process::id()));
    if build_path.exists() {
        fs::remove_dir_all(&build_path).context("Purge stale build dir")?;
    }

    let build = || -> Result<()> {
        match language {
            Language::Python => build_python_env(&build_path, packages)?,
            Language::Node => build_node_env(&build_path, packages)?,
            _ => unreachable!(),
        }
        fs::write(build_path.join(COMPLETE_MARKER), "")?;
        Ok(())
    };

    if let Err(e) = build() {
        // Leave the partial dir for diagnostics; it carries no sentinel so
        // the next attempt rebuilds.
        return Err(EngineError::EnvironmentBuildFailed(e.to_string()).into());
    }

    match fs::rename(&build_path, &env_path) {
        Ok(()) => {}
        Err(_) if env_path.join(COMPLETE_MARKER).exists() => {
            // A concurrent builder won the race; its environment is valid.
            let _ = fs::remove_dir_all(&build_path);
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&build_path);
            return Err(EngineError::EnvironmentBuildFailed(format!(
                "install rename failed: {}",
                e
            ))
            .into());
        }
    }

    if language == Language::Python {
        ensure_playwright_chromium(&env_path, packages)?;
    }

    Ok(env_path)
}

fn build_python_env(env_path: &Path, packages: &[String]) -> Result<()> {
    let python = which_python()?;
    let out = Command::new(&python)
        .arg("-m")
        .arg("venv")
        .arg(env_path)
        .output()
        .context("Create venv")?;
    if !out.status.success() {
        anyhow::bail!("venv failed: {}", String::from_utf8_lossy(&out.stderr));
    }

    if packages.is_empty() {
        return Ok(());
    }

    let pip = env_path.join("bin").join("pip");
    let out = if pip.exists() {
        Command::new(&pip)
            .args(["install", "--quiet", "--disable-pip-version-check"])
            .args(packages)
            .output()
            .context("pip install")?
    } else {
        Command::new(env_path.join("bin").join("python"))
            .args(["-m", "pip", "install", "--quiet", "--disable-pip-version-check"])
            .args(packages)
            .output()
            .context("pip install")?
    };
    if !out.status.success() {
        anyhow::bail!("pip install failed: {}", String::from_utf8_lossy(&out.stderr));
    }
    Ok(())
}

fn build_node_env(env_path: &Path, packages: &[String]) -> Result<()> {
    fs::create_dir_all(env_path).context("Create node env dir")?;

    if packages.is_empty() {
        return Ok(());
    }

    let out = Command::new("npm")
        .args(["install", "--silent"])
        .args(packages)
        .current_dir(env_path)
        .output()
        .context("npm install")?;
    if !out.status.success() {
        anyhow::bail!("npm install failed: {}", String::from_utf8_lossy(&out.stderr));
    }
    Ok(())
}

/// Post-install hook: playwright skills need the Chromium bundle, fetched
/// once per environment (5-minute cap).
fn ensure_playwright_chromium(env_path: &Path, packages: &[String]) -> Result<()> {
    let wants_playwright = packages
        .iter()
        .any(|p| p.trim().eq_ignore_ascii_case("playwright"));
    if !wants_playwright {
        return Ok(());
    }
    let marker = env_path.join(PLAYWRIGHT_MARKER);
    if marker.exists() {
        return Ok(());
    }

    let python = env_path.join("bin").join("python");
    let status = run_with_deadline(
        Command::new(&python).args(["-m", "playwright", "install", "chromium"]),
        PLAYWRIGHT_INSTALL_TIMEOUT,
    )?;
    if !status {
        return Err(EngineError::EnvironmentBuildFailed(
            "playwright install chromium failed; run it manually later".to_string(),
        )
        .into());
    }
    fs::write(&marker, "")?;
    Ok(())
}

/// Run a command to completion with a wall-clock cap. True iff it exited 0.
fn run_with_deadline(cmd: &mut Command, deadline: Duration) -> Result<bool> {
    let mut child = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn install command")?;
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.success());
        }
        if start.elapsed() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

fn which_python() -> Result<PathBuf> {
    for name in ["python3", "python"] {
        if let Ok(out) = Command::new(name).arg("--version").output() {
            if out.status.success() {
                return Ok(PathBuf::from(name));
            }
        }
    }
    anyhow::bail!("python3 or python not found in PATH")
}

/// Python interpreter for an environment (the venv's, or the system one
/// when there is no environment).
pub fn python_executable(env_path: &Path) -> PathBuf {
    let venv_python = env_path.join("bin").join("python");
    if !env_path.as_os_str().is_empty() && venv_python.exists() {
        venv_python
    } else {
        PathBuf::from("python3")
    }
}

pub fn node_executable() -> PathBuf {
    PathBuf::from("node")
}

pub fn node_modules_path(env_path: &Path) -> PathBuf {
    env_path.join("node_modules")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packages_hash_order_insensitive() {
        let a = compute_packages_hash(&["numpy".to_string(), "pandas".to_string()]);
        let b = compute_packages_hash(&["pandas".to_string(), "numpy".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_key_format() {
        let pkgs = vec!["numpy".to_string(), "pandas".to_string()];
        let key = cache_key(Language::Python, &pkgs);
        assert!(key.starts_with("py-"));
        assert_eq!(key.len(), "py-".len() + 16);

        let node_key = cache_key(Language::Node, &pkgs);
        assert!(node_key.starts_with("node-"));

        assert_eq!(cache_key(Language::Python, &[]), "py-none");
        assert_eq!(cache_key(Language::Node, &[]), "node-none");
    }

    #[test]
    fn test_same_packages_share_key() {
        // Two skills with identical package sets get the same environment
        let a = cache_key(Language::Python, &["numpy".into(), "pandas".into()]);
        let b = cache_key(Language::Python, &["pandas".into(), "numpy".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_env_for_bash() {
        let path = ensure_environment(Language::Bash, &[], None).unwrap();
        assert!(path.as_os_str().is_empty());
    }

    #[test]
    fn test_packages_from_requirements() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            tmp.path().join("requirements.txt"),
            "# deps\nrequests>=2.0\n\nnumpy\n",
        )
        .unwrap();
        let pkgs = packages_from_skill_files(tmp.path(), Language::Python);
        assert_eq!(pkgs, vec!["requests>=2.0", "numpy"]);
    }

    #[test]
    fn test_packages_from_package_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            tmp.path().join("package.json"),
            r#"{"name":"x","dependencies":{"axios":"^1.0.0","lodash":"*"}}"#,
        )
        .unwrap();
        let mut pkgs = packages_from_skill_files(tmp.path(), Language::Node);
        pkgs.sort();
        assert_eq!(pkgs, vec!["axios@^1.0.0", "lodash"]);
    }

    #[test]
    fn test_python_executable_fallback() {
        assert_eq!(python_executable(Path::new("")), PathBuf::from("python3"));
        assert_eq!(
            python_executable(Path::new("/nonexistent-env")),
            PathBuf::from("python3")
        );
    }
}
