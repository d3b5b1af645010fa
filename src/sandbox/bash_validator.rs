//! Allow-list validation for bash-tool skills.
//!
//! Validation is first-token-only: the command's first whitespace token
//! must exactly equal one of the declared `command_prefix` values. No
//! shell expansion, no pipeline splitting. Everything after the first
//! token is the allow-listed CLI's own business to argument-parse; the
//! prefix names a wholly trusted tool, not a grammar.

use crate::skill::metadata::BashToolPattern;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BashValidationError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Command '{command}' does not match any allowed pattern (allowed: {allowed})")]
    NoMatchingPattern { command: String, allowed: String },
}

/// Validate a bash command against the skill's allowed patterns.
pub fn validate_bash_command(
    command: &str,
    allowed_patterns: &[BashToolPattern],
) -> Result<(), BashValidationError> {
    let Some(first_token) = command.split_whitespace().next() else {
        return Err(BashValidationError::EmptyCommand);
    };

    if allowed_patterns
        .iter()
        .any(|p| p.command_prefix == first_token)
    {
        return Ok(());
    }

    let allowed = allowed_patterns
        .iter()
        .map(|p| p.command_prefix.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(BashValidationError::NoMatchingPattern {
        command: first_token.to_string(),
        allowed,
    })
}
