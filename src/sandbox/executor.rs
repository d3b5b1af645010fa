//! Level routing and the level-3 scan gate.
//!
//! Level 1 spawns the interpreter directly with resource limits only.
//! Level 2 wraps it in the platform sandbox. Level 3 runs the static
//! scanner first; its outcome either blocks, asks for confirmation, or
//! falls through to Level 2 execution.

use crate::config;
use crate::env::builder;
use crate::error::EngineError;
use crate::observability;
use crate::sandbox::common::{self, LaunchSpec, RawExec};
use crate::sandbox::context::{ExecutionContext, SandboxLevel};
use crate::security::rules::RulesConfig;
use crate::security::{format_scan_report, ScanCache, ScanResult, ScriptScanner};
use crate::skill::metadata::Language;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Inputs under this size are also delivered as the trailing argv entry;
/// larger inputs go stdin-only to stay clear of ARG_MAX.
pub const ARGV_INPUT_MAX: usize = 100 * 1024;

/// One skill invocation, fully resolved.
pub struct SkillRun<'a> {
    pub skill_dir: &'a Path,
    pub env_path: &'a Path,
    pub skill_name: &'a str,
    /// Entry script path relative to the skill dir
    pub entry_point: &'a str,
    pub language: Language,
    pub network_enabled: bool,
    pub input_json: &'a str,
    /// Additional argv for CLI-style scripts (exec mode)
    pub extra_args: &'a [String],
    /// Whether the input is also passed as the trailing argv entry (run mode)
    pub input_as_argv: bool,
}

/// What one execution request produced.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The child ran (including failures, timeouts, denials)
    Completed(RawExec),
    /// High-severity soft findings: caller may re-submit with
    /// `{confirmed, scan_id}`
    SoftRisk {
        scan_id: String,
        report: serde_json::Value,
        report_text: String,
    },
    /// Findings that no confirmation can approve
    HardBlocked {
        report: serde_json::Value,
        report_text: String,
    },
}

/// What the level-3 scan gate decided for this request.
#[derive(Debug)]
pub enum Gate {
    /// Execute, under the (possibly downgraded) context
    Proceed(ExecutionContext),
    /// Do not execute; hand this outcome to the caller
    Stop(ExecOutcome),
}

/// Scan a skill's entry script before any environment work happens.
/// Below level 3 the gate is a no-op. Per-skill rule overrides in
/// `.agentskill-rules.yaml` apply here.
pub fn scan_gate_for_entry(
    cache: &ScanCache,
    ctx: &ExecutionContext,
    skill_name: &str,
    skill_dir: &Path,
    script_path: &Path,
) -> Result<Gate> {
    if !ctx.effective_level().use_code_scanning() {
        return Ok(Gate::Proceed(ctx.clone()));
    }

    let (source, language) = match std::fs::read_to_string(script_path) {
        Ok(content) => {
            let lang = crate::security::detect_scan_language(script_path, &content);
            (content, lang)
        }
        Err(_) => (String::new(), "unknown".to_string()),
    };

    let rules = RulesConfig::load_or_default(Some(skill_dir));
    let result = ScriptScanner::with_config(&rules).scan_file_fail_secure(script_path, 3);
    apply_scan_result(cache, ctx, skill_name, result, &source, &language)
}

/// Scan a bash-tool command string. The command itself is the scan
/// subject; prefix validation happens before this call.
pub fn scan_gate_for_command(
    cache: &ScanCache,
    ctx: &ExecutionContext,
    skill_name: &str,
    command: &str,
) -> Result<Gate> {
    if !ctx.effective_level().use_code_scanning() {
        return Ok(Gate::Proceed(ctx.clone()));
    }
    let result = ScriptScanner::new().scan_source(command, "shell", 3);
    apply_scan_result(cache, ctx, skill_name, result, command, "shell")
}

/// Run a skill's entry script under the context's isolation level.
/// The scan gate has already run; this only executes.
pub fn execute_skill(ctx: &ExecutionContext, run: &SkillRun<'_>) -> Result<RawExec> {
    let work_dir = tempfile::TempDir::new()?;
    let spec = build_skill_spec(run, ctx, work_dir.path())?;

    observability::audit_command_invoked(
        run.skill_name,
        run.entry_point,
        &run.skill_dir.to_string_lossy(),
    );
    let start = Instant::now();
    let raw = run_spec(&spec, ctx.effective_level(), ctx)?;
    observability::audit_execution_completed(
        run.skill_name,
        raw.exit_code,
        start.elapsed().as_millis() as u64,
        raw.stdout.len(),
    );

    Ok(raw)
}

/// Run an allow-listed bash-tool command under the context's isolation
/// level. The scan gate has already run; this only executes.
pub fn execute_bash_tool(
    ctx: &ExecutionContext,
    skill_name: &str,
    skill_dir: &Path,
    env_path: &Path,
    command: &str,
    cwd: Option<&Path>,
) -> Result<RawExec> {
    let work_dir = tempfile::TempDir::new()?;

    let mut env = Vec::new();
    // CLI tools installed into the skill environment must be on PATH
    let bin_dir = builder::node_modules_path(env_path).join(".bin");
    if bin_dir.exists() {
        let current = std::env::var("PATH").unwrap_or_default();
        env.push(("PATH".to_string(), format!("{}:{}", bin_dir.display(), current)));
    }
    env.push(("SKILL_DIR".to_string(), skill_dir.display().to_string()));
    env.push(("TMPDIR".to_string(), work_dir.path().display().to_string()));

    let mut write_roots = vec![work_dir.path().to_path_buf()];
    // Output files land relative to the caller's workspace
    let cwd_path = cwd
        .filter(|p| p.is_dir())
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    if !cwd_path.as_os_str().is_empty() {
        write_roots.push(cwd_path.clone());
    }
    if let Some(out) = config::output_dir() {
        write_roots.push(out);
    }

    let spec = LaunchSpec {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), command.to_string()],
        cwd: cwd_path,
        env,
        stdin_data: None,
        read_roots: vec![skill_dir.to_path_buf(), env_path.to_path_buf()],
        write_roots,
        allow_network: ctx.allow_network,
    };

    observability::audit_command_invoked(skill_name, command, &skill_dir.to_string_lossy());
    let start = Instant::now();
    let raw = run_spec(&spec, ctx.effective_level(), ctx)?;
    observability::audit_execution_completed(
        skill_name,
        raw.exit_code,
        start.elapsed().as_millis() as u64,
        raw.stdout.len(),
    );

    Ok(raw)
}

/// Shared gate outcome logic for file and command-string scans.
fn apply_scan_result(
    cache: &ScanCache,
    ctx: &ExecutionContext,
    skill_name: &str,
    result: ScanResult,
    source: &str,
    language: &str,
) -> Result<Gate> {
    // Re-submission path: verify the scan_id against the current code hash
    if ctx.confirmed {
        let Some(scan_id) = ctx.scan_id.clone() else {
            return Err(EngineError::ConfirmationRequired.into());
        };
        let current_hash = crate::security::code_hash(language, source);
        if let Some(cached) = cache.verify(&scan_id, &current_hash) {
            if cached.has_hard_blocked() {
                return Err(EngineError::HardBlocked.into());
            }
            observability::audit_confirmation_response(skill_name, true, "caller");
            let downgraded = ctx.clone().with_user_confirmation(&scan_id);
            return Ok(Gate::Proceed(downgraded));
        }
        // Stale or mismatched confirmation never unblocks hard findings
        if result.has_hard_blocked() {
            return Err(EngineError::HardBlocked.into());
        }
        return Err(EngineError::ExpiredScan.into());
    }

    cache.put(result.clone());

    if result.has_hard_blocked() {
        return Ok(Gate::Stop(hard_blocked_outcome(&result)));
    }

    if result.requires_confirmation() {
        observability::audit_confirmation_requested(
            skill_name,
            &result.code_hash,
            result.high_severity_count,
            "High",
        );
        if ctx.auto_approve {
            observability::audit_confirmation_response(skill_name, true, "auto");
            let downgraded = ctx.clone().with_user_confirmation(&result.scan_id);
            return Ok(Gate::Proceed(downgraded));
        }
        return Ok(Gate::Stop(ExecOutcome::SoftRisk {
            scan_id: result.scan_id.clone(),
            report: result.to_json(),
            report_text: format_scan_report(&result),
        }));
    }

    if !result.findings.is_empty() {
        tracing::info!(
            skill = skill_name,
            findings = result.findings.len(),
            "Scan found only low/medium severity items"
        );
    }

    Ok(Gate::Proceed(ctx.clone()))
}

fn hard_blocked_outcome(result: &ScanResult) -> ExecOutcome {
    ExecOutcome::HardBlocked {
        report: result.to_json(),
        report_text: format_scan_report(result),
    }
}

fn build_skill_spec(
    run: &SkillRun<'_>,
    ctx: &ExecutionContext,
    work_dir: &Path,
) -> Result<LaunchSpec> {
    let (program, mut args) = match run.language {
        Language::Python => (
            builder::python_executable(run.env_path),
            vec![run.entry_point.to_string()],
        ),
        Language::Node => (builder::node_executable(), vec![run.entry_point.to_string()]),
        Language::Bash => (PathBuf::from("sh"), vec![run.entry_point.to_string()]),
        Language::Unknown => {
            return Err(EngineError::UnsupportedLanguage(run.entry_point.to_string()).into())
        }
    };

    if run.input_as_argv && !run.input_json.is_empty() && run.input_json.len() < ARGV_INPUT_MAX {
        args.push(run.input_json.to_string());
    }
    args.extend(run.extra_args.iter().cloned());

    let mut env = vec![
        ("SKILL_DIR".to_string(), run.skill_dir.display().to_string()),
        ("TMPDIR".to_string(), work_dir.display().to_string()),
    ];
    if run.language == Language::Node && !run.env_path.as_os_str().is_empty() {
        env.push((
            "NODE_PATH".to_string(),
            builder::node_modules_path(run.env_path).display().to_string(),
        ));
    }

    let mut read_roots = vec![run.skill_dir.to_path_buf()];
    if !run.env_path.as_os_str().is_empty() {
        read_roots.push(run.env_path.to_path_buf());
    }

    let mut write_roots = vec![work_dir.to_path_buf()];
    if let Some(out) = config::output_dir() {
        write_roots.push(out);
    }

    Ok(LaunchSpec {
        program,
        args,
        cwd: run.skill_dir.to_path_buf(),
        env,
        stdin_data: if run.input_json.is_empty() {
            None
        } else {
            Some(run.input_json.to_string())
        },
        read_roots,
        write_roots,
        allow_network: run.network_enabled || ctx.allow_network,
    })
}

/// Dispatch a launch spec to the right backend for the level.
fn run_spec(spec: &LaunchSpec, level: SandboxLevel, ctx: &ExecutionContext) -> Result<RawExec> {
    if !level.use_sandbox() {
        tracing::warn!("Running without sandbox (level 1): resource limits only");
        return common::execute_direct(
            spec,
            ctx.limits.timeout_secs,
            ctx.limits.max_memory_bytes(),
        );
    }

    #[cfg(target_os = "macos")]
    {
        crate::sandbox::macos::execute_sandboxed(spec, ctx.limits)
    }
    #[cfg(target_os = "linux")]
    {
        crate::sandbox::linux::execute_sandboxed(spec, ctx.limits)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = spec;
        anyhow::bail!("Unsupported platform: only Linux and macOS sandboxes are available")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::context::ResourceLimits;

    fn ctx(level: SandboxLevel) -> ExecutionContext {
        ExecutionContext {
            sandbox_level: level,
            allow_network: false,
            limits: ResourceLimits {
                max_memory_mb: 512,
                timeout_secs: 30,
            },
            auto_approve: false,
            confirmed: false,
            scan_id: None,
            requires_elevated: false,
        }
    }

    fn dangerous_scan(cache_level: u8) -> ScanResult {
        ScriptScanner::new().scan_source("import subprocess\nsubprocess.run(['ls'])\n", "python", cache_level)
    }

    #[test]
    fn test_gate_hard_block_stops() {
        let cache = ScanCache::new();
        let result = dangerous_scan(3);
        let gate =
            apply_scan_result(&cache, &ctx(SandboxLevel::Level3), "s", result, "src", "python")
                .unwrap();
        assert!(matches!(gate, Gate::Stop(ExecOutcome::HardBlocked { .. })));
    }

    #[test]
    fn test_gate_soft_risk_returns_scan_id() {
        let cache = ScanCache::new();
        let result =
            ScriptScanner::new().scan_source("import shutil\nshutil.rmtree(x)\n", "python", 3);
        let scan_id = result.scan_id.clone();
        let gate =
            apply_scan_result(&cache, &ctx(SandboxLevel::Level3), "s", result, "src", "python")
                .unwrap();
        match gate {
            Gate::Stop(ExecOutcome::SoftRisk { scan_id: id, report, .. }) => {
                assert_eq!(id, scan_id);
                assert_eq!(report["requires_confirmation"], true);
            }
            _ => panic!("expected soft risk"),
        }
        // The result is cached for the confirmation round-trip
        assert!(cache.get(&scan_id).is_some());
    }

    #[test]
    fn test_gate_auto_approve_downgrades() {
        let cache = ScanCache::new();
        let mut context = ctx(SandboxLevel::Level3);
        context.auto_approve = true;
        let result =
            ScriptScanner::new().scan_source("import shutil\nshutil.rmtree(x)\n", "python", 3);
        let gate = apply_scan_result(&cache, &context, "s", result, "src", "python").unwrap();
        match gate {
            Gate::Proceed(effective) => {
                assert_eq!(effective.sandbox_level, SandboxLevel::Level2);
                assert!(effective.confirmed);
            }
            _ => panic!("expected proceed"),
        }
    }

    #[test]
    fn test_gate_auto_approve_cannot_unblock_hard() {
        let cache = ScanCache::new();
        let mut context = ctx(SandboxLevel::Level3);
        context.auto_approve = true;
        let result = dangerous_scan(3);
        let gate = apply_scan_result(&cache, &context, "s", result, "src", "python").unwrap();
        assert!(matches!(gate, Gate::Stop(ExecOutcome::HardBlocked { .. })));
    }

    #[test]
    fn test_confirmed_round_trip_proceeds_at_level_2() {
        let cache = ScanCache::new();
        let source = "import shutil\nshutil.rmtree(x)\n";
        let result = ScriptScanner::new().scan_source(source, "python", 3);
        let scan_id = result.scan_id.clone();
        cache.put(result.clone());

        let mut context = ctx(SandboxLevel::Level3);
        context.confirmed = true;
        context.scan_id = Some(scan_id);

        let gate = apply_scan_result(&cache, &context, "s", result, source, "python").unwrap();
        match gate {
            Gate::Proceed(effective) => {
                assert_eq!(effective.sandbox_level, SandboxLevel::Level2)
            }
            _ => panic!("expected proceed at level 2"),
        }
    }

    #[test]
    fn test_confirmed_with_changed_code_is_expired() {
        let cache = ScanCache::new();
        let result = ScriptScanner::new().scan_source("x = 1\n", "python", 3);
        let scan_id = result.scan_id.clone();
        cache.put(result);

        let mut context = ctx(SandboxLevel::Level3);
        context.confirmed = true;
        context.scan_id = Some(scan_id);

        // Different source ⇒ different hash ⇒ ExpiredScan
        let fresh = ScriptScanner::new().scan_source("y = 2\n", "python", 3);
        let err = apply_scan_result(&cache, &context, "s", fresh, "y = 2\n", "python").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ExpiredScan)
        ));
    }

    #[test]
    fn test_confirmed_hard_block_immutable() {
        // Even with confirmed=true and a valid scan_id, hard blocks refuse
        let cache = ScanCache::new();
        let source = "import subprocess\nsubprocess.run(['ls'])\n";
        let result = ScriptScanner::new().scan_source(source, "python", 3);
        let scan_id = result.scan_id.clone();
        cache.put(result.clone());

        let mut context = ctx(SandboxLevel::Level3);
        context.confirmed = true;
        context.scan_id = Some(scan_id);

        let err = apply_scan_result(&cache, &context, "s", result, source, "python").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::HardBlocked)
        ));
        assert_eq!(crate::error::exit_code_for(&err), 4);
    }

    #[test]
    fn test_confirmed_without_scan_id_is_rejected() {
        let cache = ScanCache::new();
        let mut context = ctx(SandboxLevel::Level3);
        context.confirmed = true;

        let result = ScriptScanner::new().scan_source("x = 1\n", "python", 3);
        let err = apply_scan_result(&cache, &context, "s", result, "x = 1\n", "python").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ConfirmationRequired)
        ));
    }

    #[test]
    fn test_build_spec_argv_threshold() {
        let run = SkillRun {
            skill_dir: Path::new("/tmp/skill"),
            env_path: Path::new(""),
            skill_name: "s",
            entry_point: "scripts/main.py",
            language: Language::Python,
            network_enabled: false,
            input_json: "{\"a\":1}",
            extra_args: &[],
            input_as_argv: true,
        };
        let spec = build_skill_spec(&run, &ctx(SandboxLevel::Level2), Path::new("/tmp/w")).unwrap();
        assert_eq!(spec.args, vec!["scripts/main.py", "{\"a\":1}"]);
        assert_eq!(spec.stdin_data.as_deref(), Some("{\"a\":1}"));

        let big_input = format!("{{\"k\":\"{}\"}}", "x".repeat(ARGV_INPUT_MAX));
        let big_run = SkillRun {
            input_json: &big_input,
            ..run
        };
        let spec = build_skill_spec(&big_run, &ctx(SandboxLevel::Level2), Path::new("/tmp/w")).unwrap();
        // Large input: stdin only, no argv delivery
        assert_eq!(spec.args, vec!["scripts/main.py"]);
        assert!(spec.stdin_data.is_some());
    }

    #[test]
    fn test_build_spec_unknown_language() {
        let run = SkillRun {
            skill_dir: Path::new("/tmp/skill"),
            env_path: Path::new(""),
            skill_name: "s",
            entry_point: "scripts/main.xyz",
            language: Language::Unknown,
            network_enabled: false,
            input_json: "{}",
            extra_args: &[],
            input_as_argv: false,
        };
        let err = build_skill_spec(&run, &ctx(SandboxLevel::Level2), Path::new("/tmp/w")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::UnsupportedLanguage(_))
        ));
    }
}
