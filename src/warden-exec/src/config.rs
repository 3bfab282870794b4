//! Engine configuration.
//!
//! Durations are integer milliseconds on the wire:
//!
//! ```toml
//! max_concurrent = 4
//! default_timeout = 15000
//! max_timeout = 120000
//! audit_log = false
//!
//! [security]
//! allowlist_mode = "strict"
//! allowlist = ["ls", "cat"]
//!
//! [sandbox.resources]
//! max_processes = 10
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use strum_macros::Display;
use warden_policy::PolicyConfig;
use warden_protocol::{DEFAULT_MAX_OUTPUT_SIZE, ResourceLimits, SandboxConfig};
use warden_sandbox::ResourceSandbox;

use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings used by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Engine-wide settings and per-command defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Validator configuration, required.
    pub security: Option<PolicyConfig>,

    /// Sandbox applied to commands that carry none, required.
    pub sandbox: Option<SandboxConfig>,

    /// Maximum number of simultaneously running processes.
    pub max_concurrent: usize,

    /// Timeout for commands that set none.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_timeout: Duration,

    /// Upper bound for any timeout, zero for no bound.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_timeout: Duration,

    /// Output cap for commands that set none.
    pub max_output_size: u64,

    /// Working directory for commands that set none.
    pub work_dir: Option<PathBuf>,

    /// Base environment. Keys a command sets itself take precedence.
    pub env: HashMap<String, String>,

    /// Emit audit records on the `warden::audit` target. On by default.
    pub audit_log: bool,

    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security: Some(PolicyConfig::default()),
            sandbox: Some(SandboxConfig::default()),
            max_concurrent: 10,
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(600),
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            work_dir: None,
            env: HashMap::new(),
            audit_log: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Locked-down preset: a handful of read-only commands, tight limits.
    pub fn strict() -> Self {
        let resources = ResourceLimits {
            max_memory: 100 * MIB,
            max_processes: 5,
            timeout: Duration::from_secs(60),
            ..ResourceLimits::default()
        };
        Self {
            security: Some(PolicyConfig::strict(&["ls", "cat", "echo", "pwd"])),
            sandbox: Some(SandboxConfig::default().with_resources(resources)),
            max_concurrent: 3,
            default_timeout: Duration::from_secs(15),
            max_timeout: Duration::from_secs(120),
            audit_log: true,
            ..Self::default()
        }
    }

    /// Relaxed preset: no sandbox, generous limits.
    pub fn permissive() -> Self {
        Self {
            sandbox: Some(SandboxConfig::disabled()),
            max_concurrent: 50,
            default_timeout: Duration::from_secs(300),
            max_timeout: Duration::from_secs(1800),
            max_output_size: 100 * MIB,
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing fields take their default values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.is_none() {
            return Err(ConfigError::Missing("security"));
        }
        let Some(sandbox) = &self.sandbox else {
            return Err(ConfigError::Missing("sandbox"));
        };
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be greater than zero".to_string(),
            ));
        }
        if !self.max_timeout.is_zero() && self.default_timeout > self.max_timeout {
            return Err(ConfigError::Invalid(format!(
                "default_timeout ({:?}) exceeds max_timeout ({:?})",
                self.default_timeout, self.max_timeout
            )));
        }
        ResourceSandbox::validate(sandbox)?;
        Ok(())
    }
}
