//! Enforcement backends.

use strum_macros::Display;
use tokio::process::Command;
use warden_protocol::SandboxConfig;

use crate::SandboxResult;

/// Whether a backend actually enforced the resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Enforcement {
    Enforced,
    DeclaredOnly,
}

/// Trait for platform enforcement backends.
///
/// A backend receives the prepared (not yet spawned) process and may attach
/// pre-exec hooks or other creation attributes to it.
pub trait SandboxBackend: Send + Sync + std::fmt::Debug {
    /// Returns the backend name (e.g., "declared-only", "rlimit").
    fn name(&self) -> &str;

    /// Checks if the backend can enforce anything on the current system.
    fn is_available(&self) -> bool;

    /// Attach enforcement for `config` to the prepared process.
    fn apply(&self, config: &SandboxConfig, command: &mut Command) -> SandboxResult<Enforcement>;
}

/// Backend that validates nothing further and enforces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredOnlyBackend;

impl SandboxBackend for DeclaredOnlyBackend {
    fn name(&self) -> &str {
        "declared-only"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn apply(&self, _config: &SandboxConfig, _command: &mut Command) -> SandboxResult<Enforcement> {
        Ok(Enforcement::DeclaredOnly)
    }
}
