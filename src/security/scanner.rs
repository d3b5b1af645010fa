//! Line-oriented static scanner. Never executes the code it inspects.
//!
//! The scanner compiles its rule set once and walks the source line by
//! line, skipping comments. If scanning itself fails it reports a
//! synthetic high-severity finding so callers refuse execution rather
//! than run unscanned code.

use super::default_rules::default_rules;
use super::rules::{RulesConfig, SecurityRule};
use super::types::{Finding, IssueType, ScanResult, Severity};
use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub struct ScriptScanner {
    allow_network: bool,
    allow_file_ops: bool,
    allow_process_exec: bool,
    rules: Vec<(SecurityRule, Regex)>,
    disabled_rules: Vec<String>,
}

impl Default for ScriptScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptScanner {
    pub fn new() -> Self {
        Self {
            allow_network: false,
            allow_file_ops: false,
            allow_process_exec: false,
            rules: Self::compile_rules(&default_rules()),
            disabled_rules: Vec::new(),
        }
    }

    pub fn with_config(config: &RulesConfig) -> Self {
        let mut rules = if config.use_default_rules {
            default_rules()
        } else {
            Vec::new()
        };
        rules.extend(config.rules.clone());

        Self {
            allow_network: false,
            allow_file_ops: false,
            allow_process_exec: false,
            rules: Self::compile_rules(&rules),
            disabled_rules: config.disabled_rules.clone(),
        }
    }

    fn compile_rules(rules: &[SecurityRule]) -> Vec<(SecurityRule, Regex)> {
        rules
            .iter()
            .filter(|r| r.enabled)
            .filter_map(|rule| match rule.compile() {
                Ok(regex) => Some((rule.clone(), regex)),
                Err(e) => {
                    tracing::warn!("Failed to compile rule '{}': {}", rule.id, e);
                    None
                }
            })
            .collect()
    }

    pub fn allow_network(mut self, allowed: bool) -> Self {
        self.allow_network = allowed;
        self
    }

    pub fn allow_file_ops(mut self, allowed: bool) -> Self {
        self.allow_file_ops = allowed;
        self
    }

    pub fn allow_process_exec(mut self, allowed: bool) -> Self {
        self.allow_process_exec = allowed;
        self
    }

    /// Scan a script file. Language is inferred from the extension, or the
    /// shebang when there is none.
    pub fn scan_file(&self, script_path: &Path, sandbox_level: u8) -> Result<ScanResult> {
        let content = fs::read_to_string(script_path)
            .with_context(|| format!("Failed to read script: {}", script_path.display()))?;
        let language = detect_scan_language(script_path, &content);
        Ok(self.scan_source(&content, &language, sandbox_level))
    }

    /// Scan raw source in a known language.
    pub fn scan_source(&self, content: &str, language: &str, sandbox_level: u8) -> ScanResult {
        let mut findings = Vec::new();

        for (line_idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if is_comment_line(trimmed, language) {
                continue;
            }

            for (rule, regex) in &self.rules {
                if self.disabled_rules.contains(&rule.id) {
                    continue;
                }
                if !rule.languages.is_empty() && !rule.languages.iter().any(|l| l == language) {
                    continue;
                }
                if !regex.is_match(line) {
                    continue;
                }

                let report = match rule.issue_type {
                    IssueType::NetworkRequest => !self.allow_network,
                    IssueType::FileOperation => !self.allow_file_ops,
                    IssueType::ProcessExecution => !self.allow_process_exec,
                    _ => true,
                };
                if report {
                    findings.push(Finding {
                        rule_id: rule.id.clone(),
                        severity: rule.severity,
                        issue_type: rule.issue_type,
                        line_number: line_idx + 1,
                        description: rule.description.clone(),
                        code_snippet: trimmed.to_string(),
                    });
                }
            }
        }

        ScanResult::new(
            Uuid::new_v4().to_string(),
            code_hash(language, content),
            findings,
            sandbox_level,
        )
    }

    /// Fail-secure wrapper: a scan that errors yields a synthetic
    /// high-severity finding instead of a clean result.
    pub fn scan_file_fail_secure(&self, script_path: &Path, sandbox_level: u8) -> ScanResult {
        match self.scan_file(script_path, sandbox_level) {
            Ok(result) => result,
            Err(e) => ScanResult::new(
                Uuid::new_v4().to_string(),
                String::new(),
                vec![Finding {
                    rule_id: "scan-exception".to_string(),
                    severity: Severity::High,
                    issue_type: IssueType::ScanError,
                    line_number: 0,
                    description: format!("Security scan failed: {}", e),
                    code_snippet: String::new(),
                }],
                sandbox_level,
            ),
        }
    }
}

/// Truncated SHA-256 over (language, code): binds a scan result to exactly
/// what was scanned.
pub fn code_hash(language: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn is_comment_line(line: &str, language: &str) -> bool {
    match language {
        "python" => line.starts_with('#'),
        "javascript" => line.starts_with("//") || line.starts_with("/*") || line.starts_with('*'),
        "shell" => line.starts_with('#') && !line.starts_with("#!"),
        _ => false,
    }
}

/// Map a script path to the scanner's language key.
pub fn detect_scan_language(script_path: &Path, content: &str) -> String {
    let by_ext = script_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "py" => "python",
            "js" | "ts" | "mjs" | "cjs" => "javascript",
            "sh" | "bash" => "shell",
            _ => "unknown",
        });

    match by_ext {
        Some(lang) if lang != "unknown" => lang.to_string(),
        _ => {
            let first = content.lines().next().unwrap_or("");
            if first.starts_with("#!") {
                if first.contains("python") {
                    return "python".to_string();
                } else if first.contains("node") {
                    return "javascript".to_string();
                } else if first.contains("sh") {
                    return "shell".to_string();
                }
            }
            "unknown".to_string()
        }
    }
}

/// Human-readable scan report.
pub fn format_scan_report(result: &ScanResult) -> String {
    if result.findings.is_empty() {
        return "✅ Security scan passed. No issues found.".to_string();
    }

    let mut lines = vec![
        format!("📋 Security Scan Report (ID: {})", &result.scan_id[..8.min(result.scan_id.len())]),
        format!("   Sandbox Level: L{}", result.sandbox_level),
        format!("   Found {} item(s) for review:", result.findings.len()),
        String::new(),
    ];

    let hard_blocked: Vec<&str> = result
        .hard_blocked_findings()
        .iter()
        .map(|f| f.rule_id.as_str())
        .collect();

    for (idx, finding) in result.findings.iter().enumerate() {
        let icon = match finding.severity {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        };
        let marker = if hard_blocked.contains(&finding.rule_id.as_str()) {
            " 🚫 [HARD BLOCKED]"
        } else {
            ""
        };
        lines.push(format!(
            "  {} #{} [{}] {}{}",
            icon,
            idx + 1,
            finding.severity.as_str(),
            finding.issue_type,
            marker
        ));
        lines.push(format!("     ├─ Rule: {}", finding.rule_id));
        lines.push(format!(
            "     ├─ Line {}: {}",
            finding.line_number, finding.description
        ));
        let snippet: String = finding.code_snippet.chars().take(60).collect();
        lines.push(format!("     └─ Code: {}", snippet));
        lines.push(String::new());
    }

    if result.has_hard_blocked() {
        lines.push("🚫 HARD BLOCKED: this code contains operations that cannot execute".to_string());
        lines.push(format!(
            "   in the L{} sandbox, even with confirmation.",
            result.sandbox_level
        ));
        lines.push("   Modify the code, or run at a lower sandbox level if permitted.".to_string());
    } else if result.high_severity_count > 0 {
        lines.push("⚠️  High severity findings. Confirmation required to execute.".to_string());
        lines.push(format!(
            "   To proceed, re-submit with confirmed=true and scan_id=\"{}\"",
            result.scan_id
        ));
    } else {
        lines.push("ℹ️  Only low/medium severity findings. Safe to execute.".to_string());
    }

    lines.join("\n")
}
