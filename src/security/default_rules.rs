//! Built-in scanning rules for Python, JavaScript/Node, and shell.

use super::rules::SecurityRule;
use super::types::{IssueType, Severity};

/// Default Python rules. Word-boundary guards keep method calls like
/// `file.open()` from matching the builtin rules.
pub fn default_python_rules() -> Vec<SecurityRule> {
    vec![
        // Process execution (hard-blocked at level 3)
        SecurityRule::new(
            "py-subprocess",
            r"subprocess\.\w+\s*\(",
            IssueType::ProcessExecution,
            Severity::High,
            "Subprocess execution",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-os-system",
            r"os\.(?:system|popen|spawn\w*)\s*\(",
            IssueType::ProcessExecution,
            Severity::High,
            "OS command execution",
        )
        .for_languages(&["python"]),
        // Code injection
        SecurityRule::new(
            "py-eval-exec",
            r"(?:^|[^.\w])(?:eval|exec)\s*\(",
            IssueType::CodeInjection,
            Severity::High,
            "eval()/exec() - arbitrary code execution",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-dynamic-import",
            r"__import__\s*\(|importlib\.import_module\s*\(",
            IssueType::CodeInjection,
            Severity::Critical,
            "Dynamic import (bypasses static analysis)",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-unsafe-deserialize",
            r"(?:pickle|marshal)\.loads?\s*\(|yaml\.(?:load|unsafe_load)\s*\(",
            IssueType::CodeInjection,
            Severity::High,
            "Unsafe deserialization (potential code execution)",
        )
        .for_languages(&["python"]),
        // File operations
        SecurityRule::new(
            "py-open-write",
            r#"open\s*\([^)]*,\s*(?:mode\s*=\s*)?["'](?:[wax]|r\+)"#,
            IssueType::FileOperation,
            Severity::Medium,
            "File opened for writing",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-file-delete",
            r"os\.(?:remove|unlink)\s*\(|shutil\.rmtree\s*\(",
            IssueType::FileOperation,
            Severity::High,
            "File deletion operation",
        )
        .for_languages(&["python"]),
        // Module imports
        SecurityRule::new(
            "py-os-import",
            r"^\s*(?:import\s+(?:os|subprocess|shutil)\b|from\s+(?:os|subprocess|shutil)\s+import\b)",
            IssueType::DangerousModule,
            Severity::Medium,
            "System module import",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-ctypes-import",
            r"^\s*(?:import\s+ctypes\b|from\s+ctypes\s+import\b)",
            IssueType::DangerousModule,
            Severity::Critical,
            "ctypes import (arbitrary memory access)",
        )
        .for_languages(&["python"]),
        // System access
        SecurityRule::new(
            "py-env-access",
            r"os\.(?:environ|getenv|putenv)",
            IssueType::SystemAccess,
            Severity::Medium,
            "Environment variable access",
        )
        .for_languages(&["python"]),
        // Memory bombs
        SecurityRule::new(
            "py-large-range",
            r"list\s*\(\s*range\s*\(\s*\d{8,}",
            IssueType::MemoryBomb,
            Severity::High,
            "Large range allocation (potential memory bomb)",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-large-array",
            r#"\[\s*(?:0|None|''|"")\s*\]\s*\*\s*\d{7,}"#,
            IssueType::MemoryBomb,
            Severity::High,
            "Large array allocation (potential memory bomb)",
        )
        .for_languages(&["python"]),
    ]
}

/// Default JavaScript/Node.js rules
pub fn default_javascript_rules() -> Vec<SecurityRule> {
    vec![
        SecurityRule::new(
            "js-child-process",
            r#"require\s*\(\s*["']child_process["']\s*\)|child_process\.\w+"#,
            IssueType::ProcessExecution,
            Severity::High,
            "Child process execution",
        )
        .for_languages(&["javascript"]),
        SecurityRule::new(
            "js-eval",
            r"(?:^|[^.\w])eval\s*\(|new\s+Function\s*\(",
            IssueType::CodeInjection,
            Severity::High,
            "eval() or Function constructor - arbitrary code execution",
        )
        .for_languages(&["javascript"]),
        SecurityRule::new(
            "js-fs-write",
            r"fs\.(?:writeFileSync|appendFileSync|unlinkSync|rmdirSync|rmSync)\s*\(|fs(?:\.promises)?\.(?:writeFile|appendFile|unlink|rmdir|rm)\s*\(",
            IssueType::FileOperation,
            Severity::Medium,
            "Filesystem write/delete operation",
        )
        .for_languages(&["javascript"]),
        SecurityRule::new(
            "js-large-array",
            r"new\s+Array\s*\(\s*\d{6,}\s*\)|Array\s*\(\s*\d{6,}\s*\)\.fill",
            IssueType::MemoryBomb,
            Severity::High,
            "Large array allocation (potential memory bomb)",
        )
        .for_languages(&["javascript"]),
    ]
}

/// Default shell rules
pub fn default_shell_rules() -> Vec<SecurityRule> {
    vec![
        // -r and -f together, in one token or split across two, either order
        SecurityRule::new(
            "sh-rm-rf",
            r"\brm\s+(?:\S+\s+)*-(?:[A-Za-z]*[rR][A-Za-z]*f[A-Za-z]*|[A-Za-z]*f[A-Za-z]*[rR][A-Za-z]*)\b|\brm\s+(?:\S+\s+)*-[A-Za-z]*[rR][A-Za-z]*\s+(?:\S+\s+)*-[A-Za-z]*f[A-Za-z]*\b|\brm\s+(?:\S+\s+)*-[A-Za-z]*f[A-Za-z]*\s+(?:\S+\s+)*-[A-Za-z]*[rR][A-Za-z]*\b",
            IssueType::FileOperation,
            Severity::Critical,
            "Recursive force deletion (rm -rf)",
        )
        .for_languages(&["shell"]),
        SecurityRule::new(
            "sh-curl-pipe",
            r"\b(?:curl|wget)\b[^\n|]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b",
            IssueType::ProcessExecution,
            Severity::Critical,
            "Remote script piped into a shell",
        )
        .for_languages(&["shell"]),
        SecurityRule::new(
            "sh-fork-bomb",
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            IssueType::ProcessExecution,
            Severity::Critical,
            "Fork bomb",
        )
        .for_languages(&["shell"]),
    ]
}

/// All built-in rules
pub fn default_rules() -> Vec<SecurityRule> {
    let mut rules = default_python_rules();
    rules.extend(default_javascript_rules());
    rules.extend(default_shell_rules());
    rules
}
