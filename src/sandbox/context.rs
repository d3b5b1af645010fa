//! Execution configuration: isolation level, resource limits, and the
//! immutable per-request context.

use crate::config;

/// Isolation tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxLevel {
    /// Level 1: no isolation, resource limits only
    Level1,
    /// Level 2: OS-level sandbox (Seatbelt / namespaces)
    Level2,
    /// Level 3: static scan gate + Level 2 (default)
    Level3,
}

impl Default for SandboxLevel {
    fn default() -> Self {
        Self::Level3
    }
}

impl SandboxLevel {
    /// Priority: CLI > SKILLBOX_SANDBOX_LEVEL > default (3)
    pub fn from_env_or_cli(cli_level: Option<u8>) -> Self {
        if let Some(level) = cli_level {
            return Self::from_u8(level);
        }
        if let Ok(s) = std::env::var("SKILLBOX_SANDBOX_LEVEL") {
            if let Ok(level) = s.trim().parse::<u8>() {
                return Self::from_u8(level);
            }
        }
        Self::Level3
    }

    fn from_u8(level: u8) -> Self {
        match level {
            1 => Self::Level1,
            2 => Self::Level2,
            3 => Self::Level3,
            other => {
                tracing::warn!("Invalid sandbox level {}, using default (3)", other);
                Self::Level3
            }
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Level1 => 1,
            Self::Level2 => 2,
            Self::Level3 => 3,
        }
    }

    pub fn use_sandbox(&self) -> bool {
        !matches!(self, Self::Level1)
    }

    pub fn use_code_scanning(&self) -> bool {
        matches!(self, Self::Level3)
    }
}

/// Wall-clock and memory caps applied to every invocation
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ResourceLimits {
    pub fn from_env() -> Self {
        Self {
            max_memory_mb: config::max_memory_mb(),
            timeout_secs: config::timeout_secs(),
        }
    }

    pub fn with_cli_overrides(mut self, max_memory: Option<u64>, timeout: Option<u64>) -> Self {
        if let Some(mb) = max_memory {
            self.max_memory_mb = mb;
        }
        if let Some(secs) = timeout {
            self.timeout_secs = secs;
        }
        self
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb * 1024 * 1024
    }
}

/// Immutable configuration for one execution. Modifications produce a new
/// context via the transition constructors.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub sandbox_level: SandboxLevel,
    pub allow_network: bool,
    pub limits: ResourceLimits,
    pub auto_approve: bool,
    pub confirmed: bool,
    pub scan_id: Option<String>,
    pub requires_elevated: bool,
}

impl ExecutionContext {
    pub fn from_env() -> Self {
        Self {
            sandbox_level: SandboxLevel::from_env_or_cli(None),
            allow_network: config::allow_network(),
            limits: ResourceLimits::from_env(),
            auto_approve: config::auto_approve(),
            confirmed: false,
            scan_id: None,
            requires_elevated: false,
        }
    }

    /// Caller approved a soft-risk scan: keep the OS sandbox (Level 2), mark
    /// confirmed, and carry the scan_id for hash-bound verification.
    pub fn with_user_confirmation(mut self, scan_id: &str) -> Self {
        self.sandbox_level = SandboxLevel::Level2;
        self.confirmed = true;
        self.scan_id = Some(scan_id.to_string());
        self
    }

    /// Skills declaring `requires_elevated_permissions` run without
    /// isolation.
    pub fn with_elevated_permissions(mut self) -> Self {
        self.sandbox_level = SandboxLevel::Level1;
        self.requires_elevated = true;
        self
    }

    /// The level that actually applies once global kill-switches and
    /// elevation are taken into account.
    pub fn effective_level(&self) -> SandboxLevel {
        if self.requires_elevated || !config::sandbox_enabled() {
            SandboxLevel::Level1
        } else {
            self.sandbox_level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_cli_overrides_default() {
        assert_eq!(SandboxLevel::from_env_or_cli(Some(1)), SandboxLevel::Level1);
        assert_eq!(SandboxLevel::from_env_or_cli(Some(2)), SandboxLevel::Level2);
        assert_eq!(SandboxLevel::from_env_or_cli(Some(9)), SandboxLevel::Level3);
    }

    #[test]
    fn test_limits_cli_overrides() {
        let limits = ResourceLimits {
            max_memory_mb: 512,
            timeout_secs: 120,
        }
        .with_cli_overrides(Some(128), None);
        assert_eq!(limits.max_memory_mb, 128);
        assert_eq!(limits.timeout_secs, 120);
        assert_eq!(limits.max_memory_bytes(), 128 * 1024 * 1024);
    }

    #[test]
    fn test_confirmation_transition() {
        let ctx = ExecutionContext {
            sandbox_level: SandboxLevel::Level3,
            allow_network: false,
            limits: ResourceLimits {
                max_memory_mb: 512,
                timeout_secs: 120,
            },
            auto_approve: false,
            confirmed: false,
            scan_id: None,
            requires_elevated: false,
        };
        let confirmed = ctx.with_user_confirmation("scan-123");
        assert_eq!(confirmed.sandbox_level, SandboxLevel::Level2);
        assert!(confirmed.confirmed);
        assert_eq!(confirmed.scan_id.as_deref(), Some("scan-123"));
    }

    #[test]
    fn test_elevation_transition() {
        let ctx = ExecutionContext {
            sandbox_level: SandboxLevel::Level3,
            allow_network: false,
            limits: ResourceLimits {
                max_memory_mb: 512,
                timeout_secs: 120,
            },
            auto_approve: false,
            confirmed: false,
            scan_id: None,
            requires_elevated: false,
        };
        let elevated = ctx.with_elevated_permissions();
        assert_eq!(elevated.sandbox_level, SandboxLevel::Level1);
        assert!(elevated.requires_elevated);
        assert_eq!(elevated.effective_level(), SandboxLevel::Level1);
    }
}
