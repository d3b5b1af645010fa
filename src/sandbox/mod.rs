//! Tiered OS-level isolation for skill execution.

pub mod bash_validator;
pub mod common;
pub mod context;
pub mod executor;
pub mod seatbelt;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

pub use common::{KillReason, LaunchSpec, RawExec};
pub use context::{ExecutionContext, ResourceLimits, SandboxLevel};
pub use executor::{execute_bash_tool, execute_skill, ExecOutcome, SkillRun};
