//! Security finding types and scan result model.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Severity levels for security findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    /// Critical and High both count toward the high-severity gate.
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Categories of security findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    FileOperation,
    NetworkRequest,
    CodeInjection,
    MemoryBomb,
    ProcessExecution,
    SystemAccess,
    DangerousModule,
    /// Scanner itself failed (timeout, IO error); fail-secure
    ScanError,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileOperation => write!(f, "File Operation"),
            Self::NetworkRequest => write!(f, "Network Request"),
            Self::CodeInjection => write!(f, "Code Injection"),
            Self::MemoryBomb => write!(f, "Memory Bomb"),
            Self::ProcessExecution => write!(f, "Process Execution"),
            Self::SystemAccess => write!(f, "System Access"),
            Self::DangerousModule => write!(f, "Dangerous Module"),
            Self::ScanError => write!(f, "Scan Error"),
        }
    }
}

/// A single finding reported by the scanner
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub issue_type: IssueType,
    pub line_number: usize,
    pub description: String,
    pub code_snippet: String,
}

/// Rule ids that are hard-blocked at level 3 in addition to any finding
/// with the `Process Execution` issue type.
pub const HARD_BLOCKED_RULE_IDS: &[&str] = &["py-subprocess", "py-os-system", "js-child-process"];

/// Result of scanning one script
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Opaque token binding this result to the scanned code for the TTL window
    pub scan_id: String,
    /// Truncated SHA-256 of (language, code)
    pub code_hash: String,
    /// Findings, order-stable by (line_number, rule_id)
    pub findings: Vec<Finding>,
    pub high_severity_count: usize,
    pub medium_severity_count: usize,
    pub low_severity_count: usize,
    /// Sandbox level the scan was evaluated for (hard blocks exist only at 3)
    pub sandbox_level: u8,
    pub timestamp: SystemTime,
}

impl ScanResult {
    pub fn new(scan_id: String, code_hash: String, mut findings: Vec<Finding>, sandbox_level: u8) -> Self {
        findings.sort_by(|a, b| {
            a.line_number
                .cmp(&b.line_number)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        let high = findings.iter().filter(|f| f.severity.is_high()).count();
        let medium = findings
            .iter()
            .filter(|f| f.severity == Severity::Medium)
            .count();
        let low = findings
            .iter()
            .filter(|f| f.severity == Severity::Low)
            .count();
        Self {
            scan_id,
            code_hash,
            findings,
            high_severity_count: high,
            medium_severity_count: medium,
            low_severity_count: low,
            sandbox_level,
            timestamp: SystemTime::now(),
        }
    }

    /// Findings that cannot be approved away at level 3.
    pub fn hard_blocked_findings(&self) -> Vec<&Finding> {
        if self.sandbox_level < 3 {
            return Vec::new();
        }
        self.findings
            .iter()
            .filter(|f| {
                f.issue_type == IssueType::ProcessExecution
                    || HARD_BLOCKED_RULE_IDS.contains(&f.rule_id.as_str())
            })
            .collect()
    }

    pub fn has_hard_blocked(&self) -> bool {
        !self.hard_blocked_findings().is_empty()
    }

    /// Caller confirmation is only meaningful for soft risks.
    pub fn requires_confirmation(&self) -> bool {
        self.high_severity_count > 0 && !self.has_hard_blocked()
    }

    pub fn is_safe(&self) -> bool {
        self.high_severity_count == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let findings: Vec<serde_json::Value> = self
            .findings
            .iter()
            .map(|f| {
                serde_json::json!({
                    "rule_id": f.rule_id,
                    "severity": f.severity.as_str(),
                    "issue_type": f.issue_type.to_string(),
                    "line_number": f.line_number,
                    "description": f.description,
                    "code_snippet": f.code_snippet,
                })
            })
            .collect();

        let timestamp = self
            .timestamp
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        serde_json::json!({
            "scan_id": self.scan_id,
            "code_hash": self.code_hash,
            "timestamp": timestamp,
            "is_safe": self.is_safe(),
            "findings": findings,
            "high_severity_count": self.high_severity_count,
            "medium_severity_count": self.medium_severity_count,
            "low_severity_count": self.low_severity_count,
            "requires_confirmation": self.requires_confirmation(),
            "has_hard_blocked": self.has_hard_blocked(),
            "hard_blocked_count": self.hard_blocked_findings().len(),
            "sandbox_level": self.sandbox_level,
        })
    }
}
