//! Shellwarden Protocol - data types exchanged with the execution engine.
//!
//! The upstream tool layer builds [`Command`] values and reads back
//! [`ExecutionResult`] / [`ExecutionStatus`] records. Sandbox constraints
//! ([`SandboxConfig`]) travel either embedded in a command or as engine-wide
//! defaults.

mod command;
mod execution;
mod sandbox;

#[cfg(test)]
mod tests;

pub use command::{Command, Shell};
pub use execution::{ExecutionResult, ExecutionState, ExecutionStatus, TRUNCATION_MARKER};
pub use sandbox::{FilesystemSandbox, NetworkMode, NetworkSandbox, ResourceLimits, SandboxConfig};

/// Default cap on captured output when neither the command nor the engine sets one (10 MiB).
pub const DEFAULT_MAX_OUTPUT_SIZE: u64 = 10 * 1024 * 1024;
