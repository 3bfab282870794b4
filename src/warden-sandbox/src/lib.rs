//! Shellwarden Sandbox - turns declarative sandbox settings into process
//! creation attributes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  ResourceSandbox                     │
//! │  process group · working dir · validation · logging  │
//! ├─────────────────────────────────────────────────────┤
//! │                   SandboxBackend                     │
//! │                     (trait)                          │
//! ├──────────────────────────┬──────────────────────────┤
//! │   DeclaredOnlyBackend    │      RlimitBackend       │
//! │     (all platforms)      │         (unix)           │
//! └──────────────────────────┴──────────────────────────┘
//! ```
//!
//! The sandbox itself only guarantees the process group and the working
//! directory. Everything else is handed to the backend, which reports
//! whether the limits are [`Enforcement::Enforced`] or merely
//! [`Enforcement::DeclaredOnly`]. Filesystem isolation and network
//! restrictions are never enforced by the bundled backends.

mod backend;
mod error;
mod sandbox;

#[cfg(unix)]
mod rlimit;

#[cfg(test)]
mod tests;

pub use backend::{DeclaredOnlyBackend, Enforcement, SandboxBackend};
pub use error::{SandboxError, SandboxResult};
pub use sandbox::{AppliedSandbox, ResourceSandbox, set_process_group};

#[cfg(unix)]
pub use rlimit::RlimitBackend;
