//! Request handlers shared by the CLI and the IPC daemon: run, exec,
//! bash, list, scan. Each handler resolves the skill, builds its
//! environment, routes through the sandbox executor, and shapes the
//! result for the caller.

use crate::config;
use crate::env::builder;
use crate::error::EngineError;
use crate::output::{extract_json_from_output, format_sandbox_error, ExtractStrategy};
use crate::sandbox::bash_validator::validate_bash_command;
use crate::sandbox::{
    executor, ExecOutcome, ExecutionContext, KillReason, RawExec, ResourceLimits, SandboxLevel,
    SkillRun,
};
use crate::security::{format_scan_report, ScanCache, ScriptScanner};
use crate::skill::metadata::{self, Language, SkillMetadata};
use crate::skill::resolver;
use anyhow::Result;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-process services. The daemon owns one for its lifetime; CLI
/// one-shot invocations construct and drop one per run.
#[derive(Default)]
pub struct Services {
    pub scan_cache: ScanCache,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Options shared by run and exec requests
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub allow_network: bool,
    pub cache_dir: Option<String>,
    pub max_memory: Option<u64>,
    pub timeout: Option<u64>,
    pub sandbox_level: Option<u8>,
    pub allow_unknown_packages: bool,
    pub confirmed: bool,
    pub scan_id: Option<String>,
}

/// What a handler hands back to its surface (CLI or RPC)
#[derive(Debug)]
pub struct RunOutcome {
    /// Child stdout, or the JSON scan report for gated outcomes
    pub output: String,
    /// Normalised diagnostics: the failure message for failed children,
    /// the human-readable scan report for gated outcomes
    pub stderr: String,
    /// 0 ok, 2 soft risk, 4 hard block, 124 timeout, child code otherwise
    pub exit_code: i32,
}

/// Parsed execution result, the caller-facing shape of a finished child.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Interpret a finished child: extract the JSON envelope, normalise
/// failure messages.
pub fn parse_execution_result(raw: &RawExec) -> ExecutionResult {
    match raw.kill_reason {
        Some(KillReason::Timeout) => {
            return ExecutionResult {
                success: false,
                output: None,
                error: Some("Timeout".to_string()),
                exit_code: raw.exit_code,
                stdout: raw.stdout.clone(),
                stderr: raw.stderr.clone(),
            }
        }
        Some(KillReason::MemoryLimit) => {
            return ExecutionResult {
                success: false,
                output: None,
                error: Some("Memory limit exceeded".to_string()),
                exit_code: raw.exit_code,
                stdout: raw.stdout.clone(),
                stderr: raw.stderr.clone(),
            }
        }
        None => {}
    }

    if raw.exit_code == 0 {
        let output = extract_json_from_output(&raw.stdout, ExtractStrategy::Auto).or_else(|| {
            let trimmed = raw.stdout.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(json!({ "result": trimmed }))
            }
        });
        ExecutionResult {
            success: true,
            output,
            error: None,
            exit_code: 0,
            stdout: raw.stdout.clone(),
            stderr: raw.stderr.clone(),
        }
    } else {
        let message = if raw.stderr.trim().is_empty() {
            raw.stdout.trim().to_string()
        } else {
            raw.stderr.trim().to_string()
        };
        let formatted = format_sandbox_error(&message);
        // A mapped message means the OS sandbox refused something; label it
        // with the stable error kind and drop the raw traceback
        let error = if formatted != message {
            EngineError::SandboxDeniedOperation(formatted).to_string()
        } else {
            formatted
        };
        ExecutionResult {
            success: false,
            output: None,
            error: Some(error),
            exit_code: raw.exit_code,
            stdout: raw.stdout.clone(),
            stderr: raw.stderr.clone(),
        }
    }
}

// ─── Path guards ─────────────────────────────────────────────────────────────

/// Resolve a caller-supplied path and refuse anything that lands outside
/// the configured skills root after symlink/`..` resolution. Relative
/// paths are taken relative to the root itself. `kind` names the path in
/// diagnostics ("skill directory", "script", ...).
pub fn resolve_under_skills_root(path: &str, kind: &str) -> Result<PathBuf> {
    let root = config::skills_root();
    let root = root.canonicalize().map_err(|e| {
        EngineError::InvalidRequest(format!(
            "skills root {} is unusable: {}",
            root.display(),
            e
        ))
    })?;

    let candidate = Path::new(path);
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let resolved = absolute
        .canonicalize()
        .map_err(|_| EngineError::InvalidRequest(format!("no such {}: {}", kind, path)))?;

    if resolved.strip_prefix(&root).is_err() {
        return Err(EngineError::InvalidRequest(format!(
            "{} {} resolves outside the skills root {}",
            kind,
            path,
            root.display()
        ))
        .into());
    }
    Ok(resolved)
}

fn resolve_skill_dir(skill_dir: &str) -> Result<PathBuf> {
    resolve_under_skills_root(skill_dir, "skill directory")
}

// ─── Context assembly ────────────────────────────────────────────────────────

fn build_context(opts: &RunOptions, meta: Option<&SkillMetadata>) -> ExecutionContext {
    let mut ctx = ExecutionContext::from_env();
    ctx.sandbox_level = SandboxLevel::from_env_or_cli(opts.sandbox_level);
    ctx.limits = ResourceLimits::from_env().with_cli_overrides(opts.max_memory, opts.timeout);
    if opts.allow_network {
        ctx.allow_network = true;
    }
    ctx.confirmed = opts.confirmed;
    ctx.scan_id = opts.scan_id.clone();
    if meta.map(|m| m.requires_elevated_permissions).unwrap_or(false) {
        ctx = ctx.with_elevated_permissions();
    }
    ctx
}

// ─── Environment resolution ──────────────────────────────────────────────────

fn resolve_environment(
    skill_dir: &Path,
    meta: &SkillMetadata,
    language: Language,
    opts: &RunOptions,
) -> Result<PathBuf> {
    let resolved = resolver::resolve_packages(
        skill_dir,
        meta.compatibility.as_deref(),
        language,
        opts.allow_unknown_packages,
    )?;
    tracing::debug!(
        resolver = %resolved.resolver,
        packages = ?resolved.packages,
        "Resolved skill dependencies"
    );

    let packages = if resolved.packages.is_empty() {
        builder::packages_from_skill_files(skill_dir, language)
    } else {
        resolved.packages
    };

    builder::ensure_environment(language, &packages, opts.cache_dir.as_deref())
}

// ─── run ─────────────────────────────────────────────────────────────────────

/// Execute a skill through its declared entry point.
pub fn run_skill(
    services: &Services,
    skill_dir: &str,
    input_json: &str,
    opts: &RunOptions,
) -> Result<RunOutcome> {
    let skill_path = resolve_skill_dir(skill_dir)?;
    let meta = metadata::parse_skill_metadata(&skill_path)?;

    if meta.is_bash_tool_skill() {
        return Err(EngineError::InvalidRequest(format!(
            "skill '{}' is a bash-tool skill; use the bash verb",
            meta.name
        ))
        .into());
    }
    let entry_point = meta
        .entry_point
        .clone()
        .ok_or_else(|| EngineError::MissingEntryPoint(meta.name.clone()))?;
    if !skill_path.join(&entry_point).exists() {
        return Err(EngineError::MissingEntryPoint(format!(
            "{}: {} not found",
            meta.name, entry_point
        ))
        .into());
    }

    serde_json::from_str::<Value>(input_json)
        .map_err(|e| EngineError::InvalidRequest(format!("invalid input JSON: {}", e)))?;

    // The scan gate runs before any environment work
    let ctx = build_context(opts, Some(&meta));
    let ctx = match executor::scan_gate_for_entry(
        &services.scan_cache,
        &ctx,
        &meta.name,
        &skill_path,
        &skill_path.join(&entry_point),
    )? {
        executor::Gate::Stop(outcome) => return Ok(shape_outcome(outcome)),
        executor::Gate::Proceed(ctx) => ctx,
    };

    let language = effective_language(&meta, &entry_point);
    let env_path = resolve_environment(&skill_path, &meta, language, opts)?;

    let run = SkillRun {
        skill_dir: &skill_path,
        env_path: &env_path,
        skill_name: &meta.name,
        entry_point: &entry_point,
        language,
        network_enabled: meta.network.enabled,
        input_json,
        extra_args: &[],
        input_as_argv: true,
    };

    let raw = executor::execute_skill(&ctx, &run)?;
    Ok(shape_outcome(ExecOutcome::Completed(raw)))
}

// ─── exec ────────────────────────────────────────────────────────────────────

/// Execute an arbitrary script inside a skill directory.
pub fn exec_script(
    services: &Services,
    skill_dir: &str,
    script_path: &str,
    input_json: &str,
    args: Option<&str>,
    opts: &RunOptions,
) -> Result<RunOutcome> {
    let skill_path = resolve_skill_dir(skill_dir)?;

    let full_script = skill_path.join(script_path);
    let canonical_script = full_script.canonicalize().map_err(|_| {
        EngineError::InvalidRequest(format!("script not found: {}", full_script.display()))
    })?;
    // The script must resolve inside the skill bundle itself
    if canonical_script.strip_prefix(&skill_path).is_err() {
        return Err(EngineError::InvalidRequest(format!(
            "script {} resolves outside the skill directory",
            script_path
        ))
        .into());
    }

    let input: Value = serde_json::from_str(input_json)
        .map_err(|e| EngineError::InvalidRequest(format!("invalid input JSON: {}", e)))?;

    let language = detect_script_language(&canonical_script)?;

    // SKILL.md is optional for exec; absent means a bare script run
    let meta = if skill_path.join("SKILL.md").exists() {
        Some(metadata::parse_skill_metadata(&skill_path)?)
    } else {
        None
    };
    let name = meta.as_ref().map(|m| m.name.clone()).unwrap_or_else(|| {
        skill_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    });

    // The scan gate runs before any environment work
    let ctx = build_context(opts, meta.as_ref());
    let ctx = match executor::scan_gate_for_entry(
        &services.scan_cache,
        &ctx,
        &name,
        &skill_path,
        &canonical_script,
    )? {
        executor::Gate::Stop(outcome) => return Ok(shape_outcome(outcome)),
        executor::Gate::Proceed(ctx) => ctx,
    };

    let env_path = match &meta {
        Some(meta) => resolve_environment(&skill_path, meta, language, opts)?,
        None => PathBuf::new(),
    };

    // Explicit argv wins; otherwise derive CLI-style argv from the input
    let extra_args: Vec<String> = match args {
        Some(s) => s.split_whitespace().map(String::from).collect(),
        None => input
            .as_object()
            .map(convert_json_to_cli_args)
            .unwrap_or_default(),
    };

    let run = SkillRun {
        skill_dir: &skill_path,
        env_path: &env_path,
        skill_name: &name,
        entry_point: script_path,
        language,
        network_enabled: meta.as_ref().map(|m| m.network.enabled).unwrap_or(false),
        input_json,
        extra_args: &extra_args,
        input_as_argv: extra_args.is_empty(),
    };

    let raw = executor::execute_skill(&ctx, &run)?;
    Ok(shape_outcome(ExecOutcome::Completed(raw)))
}

// ─── bash ────────────────────────────────────────────────────────────────────

/// Execute an allow-listed command for a bash-tool skill.
pub fn bash_command(
    services: &Services,
    skill_dir: &str,
    command: &str,
    cache_dir: Option<&str>,
    timeout_secs: Option<u64>,
    cwd: Option<&str>,
) -> Result<RunOutcome> {
    let skill_path = resolve_skill_dir(skill_dir)?;
    let meta = metadata::parse_skill_metadata(&skill_path)?;

    if !meta.is_bash_tool_skill() {
        return Err(EngineError::InvalidRequest(format!(
            "skill '{}' is not a bash-tool skill (missing allowed-tools or has entry_point)",
            meta.name
        ))
        .into());
    }

    validate_bash_command(command, &meta.allowed_bash_patterns)
        .map_err(|e| EngineError::DisallowedBashCommand(e.to_string()))?;

    let opts = RunOptions {
        timeout: timeout_secs,
        allow_network: meta.network.enabled,
        ..Default::default()
    };
    let ctx = build_context(&opts, Some(&meta));

    // The command string is the scan subject at level 3
    let ctx = match executor::scan_gate_for_command(&services.scan_cache, &ctx, &meta.name, command)?
    {
        executor::Gate::Stop(outcome) => return Ok(shape_outcome(outcome)),
        executor::Gate::Proceed(ctx) => ctx,
    };

    // Bash-tool skills may carry Node CLI dependencies
    let packages = meta
        .resolved_packages
        .clone()
        .unwrap_or_else(|| builder::packages_from_skill_files(&skill_path, Language::Node));
    let env_path = if packages.is_empty() {
        PathBuf::new()
    } else {
        builder::ensure_environment(Language::Node, &packages, cache_dir)?
    };

    let raw = executor::execute_bash_tool(
        &ctx,
        &meta.name,
        &skill_path,
        &env_path,
        command,
        cwd.map(Path::new),
    )?;

    let body = json!({
        "stdout": raw.stdout.trim(),
        "stderr": raw.stderr.trim(),
        "exit_code": raw.exit_code,
    });
    Ok(RunOutcome {
        output: body.to_string(),
        stderr: String::new(),
        exit_code: raw.exit_code,
    })
}

// ─── security-scan ───────────────────────────────────────────────────────────

/// Pure scan of one script, no execution. Returns (text report, JSON report).
pub fn security_scan(script_path: &str) -> Result<(String, Value)> {
    let path = resolve_under_skills_root(script_path, "script")?;
    let result = ScriptScanner::new()
        .scan_file(&path, SandboxLevel::from_env_or_cli(None).as_u8())
        .map_err(|e| EngineError::ScanError(e.to_string()))?;
    Ok((format_scan_report(&result), result.to_json()))
}

// ─── list ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SkillSummary {
    pub name: String,
    pub description: Option<String>,
    pub language: Language,
    pub entry_point: Option<String>,
    pub bash_tool: bool,
    pub network_enabled: bool,
    pub skill_dir: PathBuf,
}

/// Enumerate the skills one level under `skills_dir`.
pub fn list_skills(skills_dir: &str) -> Result<Vec<SkillSummary>> {
    let root = resolve_under_skills_root(skills_dir, "skills directory")?;
    let mut skills = Vec::new();

    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join("SKILL.md").exists() {
            continue;
        }
        match metadata::parse_skill_metadata(&path) {
            Ok(meta) => skills.push(SkillSummary {
                name: meta.name.clone(),
                description: meta.description.clone(),
                language: meta.language,
                entry_point: meta.entry_point.clone(),
                bash_tool: meta.is_bash_tool_skill(),
                network_enabled: meta.network.enabled,
                skill_dir: path,
            }),
            Err(e) => tracing::warn!("Skipping unparseable skill at {}: {}", path.display(), e),
        }
    }

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(skills)
}

/// Tool definitions plus per-tool metadata for RPC consumers.
pub fn tool_definitions(skills: &[SkillSummary]) -> (Vec<Value>, serde_json::Map<String, Value>) {
    let mut tools = Vec::new();
    let mut tool_meta = serde_json::Map::new();

    for skill in skills {
        let tool_name = skill.name.replace('-', "_");
        let parameters = if skill.bash_tool {
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Allow-listed CLI command to run"
                    }
                },
                "required": ["command"]
            })
        } else {
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": true
            })
        };

        tools.push(json!({
            "type": "function",
            "function": {
                "name": tool_name,
                "description": skill.description.clone().unwrap_or_default(),
                "parameters": parameters,
            }
        }));

        tool_meta.insert(
            tool_name,
            json!({
                "skill_dir": skill.skill_dir.to_string_lossy(),
                "entry_point": skill.entry_point,
                "language": skill.language.as_str(),
                "is_bash": skill.bash_tool,
                "network_enabled": skill.network_enabled,
            }),
        );
    }

    (tools, tool_meta)
}

// ─── scan (directory inventory) ──────────────────────────────────────────────

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "assets",
    "references",
];

/// Walk a skill directory and report its executable scripts with previews.
pub fn scan_skill_dir(skill_dir: &str, preview_lines: usize) -> Result<Value> {
    let skill_path = resolve_skill_dir(skill_dir)?;

    let skill_metadata = if skill_path.join("SKILL.md").exists() {
        metadata::parse_skill_metadata(&skill_path).ok().map(|m| {
            json!({
                "name": m.name,
                "description": m.description,
                "entry_point": m.entry_point,
                "language": m.language.as_str(),
                "network_enabled": m.network.enabled,
                "compatibility": m.compatibility,
            })
        })
    } else {
        None
    };

    let mut scripts = Vec::new();
    collect_scripts(&skill_path, &skill_path, preview_lines, &mut scripts)?;

    Ok(json!({
        "skill_dir": skill_dir,
        "has_skill_md": skill_path.join("SKILL.md").exists(),
        "skill_metadata": skill_metadata,
        "scripts": scripts,
        "directories": {
            "scripts": skill_path.join("scripts").exists(),
            "references": skill_path.join("references").exists(),
            "assets": skill_path.join("assets").exists(),
        }
    }))
}

fn collect_scripts(
    base: &Path,
    current: &Path,
    preview_lines: usize,
    scripts: &mut Vec<Value>,
) -> Result<()> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();

        if file_name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if !SKIP_DIRS.contains(&file_name.as_str()) {
                collect_scripts(base, &path, preview_lines, scripts)?;
            }
            continue;
        }
        if let Some(info) = analyze_script(&path, base, preview_lines) {
            scripts.push(info);
        }
    }
    Ok(())
}

fn analyze_script(path: &Path, base: &Path, preview_lines: usize) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    let language = crate::security::detect_scan_language(path, &content);
    if language == "unknown" {
        return None;
    }

    let lines: Vec<&str> = content.lines().collect();
    let preview: String = lines
        .iter()
        .take(preview_lines)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let relative = path.strip_prefix(base).ok()?;

    let uses_argparse = match language.as_str() {
        "python" => ["argparse", "sys.argv", "click", "typer"]
            .iter()
            .any(|n| content.contains(n)),
        "javascript" => ["process.argv", "yargs", "commander", "minimist"]
            .iter()
            .any(|n| content.contains(n)),
        "shell" => ["$1", "$@", "getopts"].iter().any(|n| content.contains(n)),
        _ => false,
    };
    let uses_stdin = match language.as_str() {
        "python" => content.contains("sys.stdin") || content.contains("input()"),
        "javascript" => content.contains("process.stdin") || content.contains("readline"),
        "shell" => content.contains("read "),
        _ => false,
    };
    let has_main = match language.as_str() {
        "python" => content.contains("if __name__") && content.contains("__main__"),
        "javascript" => content.contains("require.main === module") || !content.contains("export "),
        "shell" => true,
        _ => false,
    };

    Some(json!({
        "path": relative.to_string_lossy(),
        "language": language,
        "total_lines": lines.len(),
        "preview": preview,
        "description": extract_script_description(&content, &language),
        "has_main_entry": has_main,
        "uses_argparse": uses_argparse,
        "uses_stdin": uses_stdin,
        "file_size_bytes": fs::metadata(path).map(|m| m.len()).unwrap_or(0),
    }))
}

/// Pull a description out of the leading docstring or comment block.
fn extract_script_description(content: &str, language: &str) -> Option<String> {
    match language {
        "python" => {
            let trimmed = content.trim_start();
            for quote in ["\"\"\"", "'''"] {
                if let Some(rest) = trimmed.strip_prefix(quote) {
                    if let Some(end) = rest.find(quote) {
                        return Some(rest[..end].trim().to_string());
                    }
                }
            }
            leading_comment_block(content, "#")
        }
        "javascript" => {
            let trimmed = content.trim_start();
            if let Some(rest) = trimmed.strip_prefix("/**") {
                if let Some(end) = rest.find("*/") {
                    let cleaned: Vec<&str> = rest[..end]
                        .lines()
                        .map(|l| l.trim().trim_start_matches('*').trim())
                        .filter(|l| !l.is_empty())
                        .collect();
                    return Some(cleaned.join(" "));
                }
            }
            leading_comment_block(content, "//")
        }
        "shell" => leading_comment_block(content, "#"),
        _ => None,
    }
}

fn leading_comment_block(content: &str, marker: &str) -> Option<String> {
    let mut parts = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("#!") {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix(marker) {
            parts.push(rest.trim_start_matches(marker.chars().next().unwrap_or('#')).trim());
        } else if !trimmed.is_empty() {
            break;
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn effective_language(meta: &SkillMetadata, entry_point: &str) -> Language {
    if meta.language != Language::Unknown {
        meta.language
    } else {
        Language::from_extension(entry_point)
    }
}

/// Classify a script by extension, or shebang when it has none.
fn detect_script_language(script_path: &Path) -> Result<Language> {
    let ext = script_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let lang = match ext {
        "py" => Language::Python,
        "js" | "mjs" | "cjs" | "ts" => Language::Node,
        "sh" | "bash" => Language::Bash,
        "" => {
            let content = fs::read_to_string(script_path).unwrap_or_default();
            let first = content.lines().next().unwrap_or("");
            if first.starts_with("#!") {
                if first.contains("python") {
                    Language::Python
                } else if first.contains("node") {
                    Language::Node
                } else if first.contains("sh") {
                    Language::Bash
                } else {
                    Language::Unknown
                }
            } else {
                Language::Unknown
            }
        }
        _ => Language::Unknown,
    };
    if lang == Language::Unknown {
        return Err(EngineError::UnsupportedLanguage(script_path.display().to_string()).into());
    }
    Ok(lang)
}

/// Keys promoted to leading positional arguments, in order.
const POSITIONAL_KEYS: &[&str] = &["skill_name", "skill-name", "name", "input", "file", "filename"];

/// Convert a JSON object into CLI argv: positional keys first, then
/// `--kebab-case value` pairs; `true` booleans become bare flags, `false`
/// and null are omitted, lists are comma-joined.
pub fn convert_json_to_cli_args(input: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut args = Vec::new();

    for key in POSITIONAL_KEYS {
        if let Some(Value::String(s)) = input.get(*key) {
            args.push(s.clone());
        }
    }

    let normalized_positional: Vec<String> =
        POSITIONAL_KEYS.iter().map(|k| k.replace('-', "_")).collect();

    for (key, value) in input {
        if normalized_positional.contains(&key.replace('-', "_")) {
            continue;
        }
        let cli_key = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Bool(true) => args.push(cli_key),
            Value::Bool(false) | Value::Null => {}
            Value::Array(items) => {
                if !items.is_empty() {
                    args.push(cli_key);
                    args.push(
                        items
                            .iter()
                            .map(|v| match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                }
            }
            Value::String(s) => {
                args.push(cli_key);
                args.push(s.clone());
            }
            other => {
                args.push(cli_key);
                args.push(other.to_string());
            }
        }
    }

    args
}

/// Map an executor outcome onto the surface shape.
fn shape_outcome(outcome: ExecOutcome) -> RunOutcome {
    match outcome {
        ExecOutcome::Completed(raw) => {
            let parsed = parse_execution_result(&raw);
            let stderr = match parsed.error {
                Some(err) if !parsed.success => err,
                _ => raw.stderr,
            };
            RunOutcome {
                output: raw.stdout,
                stderr,
                exit_code: raw.exit_code,
            }
        }
        ExecOutcome::SoftRisk {
            report, report_text, ..
        } => RunOutcome {
            output: report.to_string(),
            stderr: report_text,
            exit_code: 2,
        },
        ExecOutcome::HardBlocked {
            report,
            report_text,
        } => RunOutcome {
            output: report.to_string(),
            stderr: report_text,
            exit_code: 4,
        },
    }
}
