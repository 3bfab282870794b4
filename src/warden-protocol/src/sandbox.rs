//! Declarative sandbox constraints.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use strum_macros::Display;

/// Network access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NetworkMode {
    /// Full network access.
    #[default]
    Full,
    /// No network access.
    None,
    /// Host network only.
    Host,
}

/// Resource constraints. Zero means unlimited.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum address space in bytes.
    pub max_memory: u64,
    /// CPU cores.
    pub max_cpu: f64,
    /// Maximum number of processes.
    pub max_processes: u64,
    /// Maximum size of a written file in bytes.
    pub max_file_size: u64,
    /// Maximum number of open file descriptors.
    pub max_open_files: u64,
    /// Execution timeout.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: 500 * 1024 * 1024,
            max_cpu: 0.0,
            max_processes: 20,
            max_file_size: 100 * 1024 * 1024,
            max_open_files: 1024,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl ResourceLimits {
    /// Limits with every value unlimited.
    pub fn unlimited() -> Self {
        Self {
            max_memory: 0,
            max_cpu: 0.0,
            max_processes: 0,
            max_file_size: 0,
            max_open_files: 0,
            timeout: Duration::ZERO,
        }
    }
}

/// Filesystem constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemSandbox {
    /// Working directory for the command.
    pub root_dir: Option<PathBuf>,
    pub read_only_paths: Vec<PathBuf>,
    pub read_write_paths: Vec<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    /// Request full isolation (chroot, namespace or container).
    pub isolate: bool,
}

/// Network constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSandbox {
    pub mode: NetworkMode,
    pub allowed_hosts: Vec<String>,
    pub allowed_ports: Vec<u16>,
    pub dns_servers: Vec<String>,
}

/// Sandbox configuration attached to a command or used as engine default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub filesystem: FilesystemSandbox,
    pub network: NetworkSandbox,
    pub resources: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filesystem: FilesystemSandbox::default(),
            network: NetworkSandbox::default(),
            resources: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// A sandbox that applies nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filesystem.root_dir = Some(dir.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceLimits) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_network_mode(mut self, mode: NetworkMode) -> Self {
        self.network.mode = mode;
        self
    }
}
