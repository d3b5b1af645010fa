//! Static security scanning: rule-driven inspection of skill scripts
//! before execution, with a TTL-bound approval cache.

pub mod default_rules;
pub mod rules;
pub mod scan_cache;
pub mod scanner;
pub mod types;

pub use scan_cache::ScanCache;
pub use scanner::{code_hash, detect_scan_language, format_scan_report, ScriptScanner};
pub use types::{Finding, IssueType, ScanResult, Severity};
