//! Security error returned by the validator.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

/// Which rule rejected the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SecurityErrorKind {
    /// Matched the blocklist.
    Blocked,
    /// Matched a dangerous-command pattern.
    DangerousPattern,
    /// Not covered by the allowlist (strict modes only).
    NotAllowed,
    /// An explicit argument matched a dangerous pattern.
    DangerousArgument,
    /// The working directory is malformed.
    InvalidWorkdir,
}

/// A command was rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("security error [{kind}]: {message} (command: {command})")]
pub struct SecurityError {
    pub kind: SecurityErrorKind,
    pub message: String,
    pub command: String,
}

impl SecurityError {
    pub fn new(
        kind: SecurityErrorKind,
        message: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            command: command.into(),
        }
    }

    pub fn blocked(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(SecurityErrorKind::Blocked, message, command)
    }

    pub fn dangerous_pattern(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(SecurityErrorKind::DangerousPattern, message, command)
    }

    pub fn not_allowed(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(SecurityErrorKind::NotAllowed, message, command)
    }
}
