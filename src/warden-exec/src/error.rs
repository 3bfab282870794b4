//! Error types for the execution engine.

use std::path::PathBuf;

use thiserror::Error;
use warden_policy::SecurityError;
use warden_sandbox::SandboxError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors returned by [`crate::ExecutionEngine`].
///
/// A process that ran and exited non-zero is not an error. Neither is a
/// killed or timed-out process: both are flags on the result.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Rejected by the security gate before any process existed.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Sandbox configuration could not be applied.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Engine configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cancelled while waiting for a concurrency slot.
    #[error("execution {id} cancelled before start")]
    Cancelled { id: String },

    /// The process could not be created.
    #[error("failed to spawn execution {id}: {message}")]
    Spawn { id: String, message: String },

    /// Another live execution already uses this id.
    #[error("execution {id} is already running")]
    DuplicateId { id: String },

    /// No live execution with this id.
    #[error("execution not found: {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Signal(#[from] SignalError),
}

impl ExecError {
    pub fn spawn(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Whether the security gate rejected the command.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

/// Signal delivery failures.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("no live process for execution {0}")]
    NotFound(String),

    #[error("failed to send {signal} to {target}: {source}")]
    Send {
        signal: &'static str,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signals are not supported on this platform")]
    Unsupported,
}

/// Engine configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0} configuration")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid sandbox defaults: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Logging bootstrap failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}
