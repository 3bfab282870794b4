//! The resource sandbox.

use std::path::Component;
use std::sync::Arc;

use tokio::process::Command;
use tracing::debug;
use warden_protocol::{NetworkMode, SandboxConfig};

use crate::{DeclaredOnlyBackend, Enforcement, SandboxBackend, SandboxError, SandboxResult};

/// What `apply` did to the prepared process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedSandbox {
    pub enabled: bool,
    /// The child will lead its own process group.
    pub process_group: bool,
    pub enforcement: Enforcement,
}

impl AppliedSandbox {
    fn disabled() -> Self {
        Self {
            enabled: false,
            process_group: false,
            enforcement: Enforcement::DeclaredOnly,
        }
    }
}

/// Applies a [`SandboxConfig`] to a prepared process through a pluggable
/// backend.
#[derive(Debug, Clone)]
pub struct ResourceSandbox {
    backend: Arc<dyn SandboxBackend>,
}

impl Default for ResourceSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSandbox {
    /// Sandbox with the [`DeclaredOnlyBackend`].
    pub fn new() -> Self {
        Self {
            backend: Arc::new(DeclaredOnlyBackend),
        }
    }

    pub fn with_backend(backend: Arc<dyn SandboxBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Check that every value in `config` is well formed.
    pub fn validate(config: &SandboxConfig) -> SandboxResult<()> {
        let cpu = config.resources.max_cpu;
        if !cpu.is_finite() {
            return Err(SandboxError::InvalidLimit {
                field: "max_cpu",
                reason: "must be a finite number".to_string(),
            });
        }
        if cpu < 0.0 {
            return Err(SandboxError::InvalidLimit {
                field: "max_cpu",
                reason: format!("must not be negative, got {cpu}"),
            });
        }

        let fs = &config.filesystem;
        for path in fs
            .root_dir
            .iter()
            .chain(fs.temp_dir.iter())
            .chain(fs.read_only_paths.iter())
            .chain(fs.read_write_paths.iter())
        {
            if path.as_os_str().is_empty() {
                return Err(SandboxError::InvalidPath("empty path".to_string()));
            }
            if path.components().any(|c| c == Component::ParentDir) {
                return Err(SandboxError::InvalidPath(format!(
                    "{} contains '..'",
                    path.display()
                )));
            }
        }

        let net = &config.network;
        if net.allowed_ports.contains(&0) {
            return Err(SandboxError::InvalidNetwork(
                "port 0 is not a valid allowed port".to_string(),
            ));
        }
        if net.mode == NetworkMode::None
            && (!net.allowed_hosts.is_empty() || !net.allowed_ports.is_empty())
        {
            return Err(SandboxError::InvalidNetwork(
                "network mode 'none' cannot allow hosts or ports".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply `config` to a prepared, not yet spawned process.
    ///
    /// No-op when the sandbox is disabled.
    pub fn apply(
        &self,
        config: &SandboxConfig,
        command: &mut Command,
    ) -> SandboxResult<AppliedSandbox> {
        if !config.enabled {
            return Ok(AppliedSandbox::disabled());
        }

        Self::validate(config)?;

        let process_group = set_process_group(command);

        if let Some(root) = &config.filesystem.root_dir {
            command.current_dir(root);
        }

        if !self.backend.is_available() {
            return Err(SandboxError::NotAvailable(self.backend.name().to_string()));
        }
        let enforcement = self.backend.apply(config, command)?;

        let fs = &config.filesystem;
        if fs.isolate || !fs.read_only_paths.is_empty() || !fs.read_write_paths.is_empty() {
            debug!(
                backend = self.backend.name(),
                isolate = fs.isolate,
                read_only = fs.read_only_paths.len(),
                read_write = fs.read_write_paths.len(),
                "filesystem constraints declared but not enforced"
            );
        }
        let net = &config.network;
        if net.mode != NetworkMode::Full || !net.allowed_hosts.is_empty() {
            debug!(
                backend = self.backend.name(),
                mode = ?net.mode,
                hosts = net.allowed_hosts.len(),
                ports = net.allowed_ports.len(),
                "network constraints declared but not enforced"
            );
        }

        Ok(AppliedSandbox {
            enabled: true,
            process_group,
            enforcement,
        })
    }
}

/// Make the child the leader of a new process group so the whole tree can be
/// signaled at once. Returns `false` where process groups do not exist.
pub fn set_process_group(command: &mut Command) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: setpgid is async-signal-safe and is the only call made
        // between fork and exec here.
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        true
    }
    #[cfg(not(unix))]
    {
        let _ = command;
        false
    }
}
