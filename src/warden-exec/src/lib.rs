#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]
//! Shellwarden Exec - sandboxed shell command execution.
//!
//! The [`ExecutionEngine`] takes a [`Command`], runs it through the security
//! gate, sanitizes its environment and working directory, waits for a
//! concurrency slot, applies sandbox constraints and spawns it in its own
//! process group. Output is either buffered into the [`ExecutionResult`] or
//! streamed line by line.
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!  Command ──────►│              ExecutionEngine             │
//!                 │  ┌───────────┐ ┌─────────┐ ┌───────────┐ │
//!                 │  │ validator │ │ sandbox │ │ semaphore │ │
//!                 │  └───────────┘ └─────────┘ └───────────┘ │
//!                 │  ┌───────────┐ ┌─────────────────┐       │
//!                 │  │ timeouts  │ │ process registry│       │
//!                 │  └───────────┘ └─────────────────┘       │
//!                 └───────┬──────────────────────────────────┘
//!                         ▼
//!          execute / execute_async / execute_stream
//! ```
//!
//! # Entry points
//!
//! - [`ExecutionEngine::execute`] blocks until the process is done
//! - [`ExecutionEngine::execute_async`] validates now and returns a handle
//! - [`ExecutionEngine::execute_stream`] additionally exposes stdout and
//!   stderr as live line streams
//!
//! [`quick_execute`], [`quick_execute_with_timeout`] and [`quick_stream`] run
//! a one-off command on a default engine.
//!
//! A rejected command fails immediately with [`ExecError::Security`] on every
//! entry point; no process is created and nothing is registered.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod signal;
pub mod timeout;
mod user;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use config::{EngineConfig, LogFormat, LoggingConfig};
pub use engine::{AsyncExecution, ExecutionEngine, ResultHandle, StreamingExecution};
pub use error::{ConfigError, ExecError, LoggingError, Result, SignalError};
pub use logging::{AUDIT_TARGET, init_logging};
pub use output::{CollectedOutput, OutputCollector, OutputStream, OutputStreamer};
pub use signal::{ProcessInfo, ProcessRegistry, Signal, SignalTarget};
pub use timeout::TimeoutManager;

pub use warden_policy::{
    AllowlistMode, CommandValidator, PolicyConfig, SecurityError, SecurityErrorKind,
};
pub use warden_protocol::{
    Command, ExecutionResult, ExecutionState, ExecutionStatus, NetworkMode, ResourceLimits,
    SandboxConfig, Shell, TRUNCATION_MARKER,
};
pub use warden_sandbox::{ResourceSandbox, SandboxBackend, SandboxError};
#[cfg(unix)]
pub use warden_sandbox::RlimitBackend;

/// Run `text` once on a default engine.
pub async fn quick_execute(text: &str) -> Result<ExecutionResult> {
    let engine = ExecutionEngine::new(EngineConfig::default())?;
    engine.execute(Command::with_generated_id(text)).await
}

/// Like [`quick_execute`] with an explicit timeout.
pub async fn quick_execute_with_timeout(
    text: &str,
    timeout: Duration,
) -> Result<ExecutionResult> {
    let engine = ExecutionEngine::new(EngineConfig::default())?;
    engine
        .execute_with_timeout(Command::with_generated_id(text), timeout)
        .await
}

/// Stream `text` once on a default engine. Must be called from within a
/// Tokio runtime.
pub fn quick_stream(text: &str) -> Result<StreamingExecution> {
    let engine = ExecutionEngine::new(EngineConfig::default())?;
    engine.execute_stream(Command::with_generated_id(text))
}
