//! Stable error kinds shared by the CLI, the daemon, and the executor.
//!
//! Every failure that crosses a process boundary maps onto one of these
//! variants; collaborators key off the exit codes, so the mapping in
//! [`EngineError::exit_code`] is part of the external contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("SKILL.md not found in {0}")]
    MissingManifest(String),

    #[error("Invalid SKILL.md manifest: {0}")]
    InvalidManifest(String),

    #[error("Skill has no entry point: {0}")]
    MissingEntryPoint(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Packages not in whitelist: {0}")]
    UnknownPackage(String),

    #[error("Environment build failed: {0}")]
    EnvironmentBuildFailed(String),

    #[error("Security scan failed: {0}")]
    ScanError(String),

    #[error("Execution blocked: code contains operations that cannot run in this sandbox")]
    HardBlocked,

    #[error("Security review required: re-submit with confirmed=true and scan_id")]
    ConfirmationRequired,

    #[error("Invalid or expired scan_id; re-scan and try again")]
    ExpiredScan,

    #[error("Command does not match any allowed pattern: {0}")]
    DisallowedBashCommand(String),

    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    #[error("Memory limit exceeded ({0} MB)")]
    MemoryLimitExceeded(u64),

    #[error("Sandbox denied operation: {0}")]
    SandboxDeniedOperation(String),

    #[error("Subprocess crashed: {0}")]
    SubprocessCrash(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Process exit code for this error. Stable: collaborators branch on
    /// 2 (confirm), 3 (re-scan), 4 (refuse), 124 (timeout).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfirmationRequired => 2,
            Self::ExpiredScan => 3,
            Self::HardBlocked => 4,
            Self::Timeout(_) => 124,
            _ => 1,
        }
    }
}

/// Map an `anyhow` error chain to a process exit code by looking for an
/// [`EngineError`] anywhere in the chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<EngineError>() {
            return e.exit_code();
        }
    }
    1
}
