//! Command submitted to the execution engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use strum_macros::Display;

use crate::sandbox::SandboxConfig;

/// Shell interpreter used to run the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Shell {
    /// POSIX `/bin/sh`.
    Sh,
    /// GNU bash, resolved through `PATH`.
    Bash,
    /// zsh, resolved through `PATH`.
    Zsh,
    /// Windows `cmd.exe`.
    Cmd,
    /// Windows PowerShell.
    PowerShell,
}

impl Default for Shell {
    fn default() -> Self {
        if cfg!(windows) { Shell::Cmd } else { Shell::Sh }
    }
}

impl Shell {
    /// Program to spawn.
    pub fn program(&self) -> &'static str {
        match self {
            Shell::Sh => "/bin/sh",
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Cmd => "cmd.exe",
            Shell::PowerShell => "powershell.exe",
        }
    }

    /// Flag that makes the interpreter run the next argument as a script.
    pub fn command_flag(&self) -> &'static str {
        match self {
            Shell::Sh | Shell::Bash | Shell::Zsh => "-c",
            Shell::Cmd => "/C",
            Shell::PowerShell => "-Command",
        }
    }

    /// Whether this interpreter follows POSIX shell syntax.
    pub fn is_posix(&self) -> bool {
        matches!(self, Shell::Sh | Shell::Bash | Shell::Zsh)
    }
}

/// A unit of work for the engine.
///
/// Zero values (`timeout`, `max_output_size`), an empty `env` and a missing
/// `work_dir` / `sandbox` mean "use the engine default".
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Execution id, unique among live executions.
    pub id: String,
    /// Raw command text handed to the shell.
    pub command: String,
    /// Extra positional arguments (`$0`, `$1`, ... for POSIX shells).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Timeout, zero for the engine default.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default)]
    pub timeout: Duration,
    /// Shell interpreter.
    #[serde(default)]
    pub shell: Shell,
    /// Capture stdout/stderr into the result.
    #[serde(default = "default_true")]
    pub capture_output: bool,
    /// Hint for the dispatch layer that the caller wants live output.
    #[serde(default)]
    pub stream_output: bool,
    /// Run as this user (requires privileges).
    #[serde(default)]
    pub user: Option<String>,
    /// Cap on captured output in bytes, zero for the engine default.
    #[serde(default)]
    pub max_output_size: u64,
    /// Sandbox constraints for this command only.
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
}

fn default_true() -> bool {
    true
}

impl Command {
    /// Create a command with the given id and text.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
            env: HashMap::new(),
            timeout: Duration::ZERO,
            shell: Shell::default(),
            capture_output: true,
            stream_output: false,
            user: None,
            max_output_size: 0,
            sandbox: None,
        }
    }

    /// Create a command with a freshly generated id.
    pub fn with_generated_id(command: impl Into<String>) -> Self {
        Self::new(Self::generate_id(), command)
    }

    /// Generate a unique execution id.
    pub fn generate_id() -> String {
        format!("exec-{}", uuid::Uuid::new_v4())
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Add one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn with_stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_max_output_size(mut self, size: u64) -> Self {
        self.max_output_size = size;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Timeout that actually applies: the smaller of the command timeout
    /// and the sandbox timeout when both are set, otherwise whichever is set.
    /// A disabled sandbox contributes nothing.
    pub fn effective_timeout(&self) -> Duration {
        let sandbox_timeout = self
            .sandbox
            .as_ref()
            .filter(|s| s.enabled)
            .map(|s| s.resources.timeout)
            .unwrap_or(Duration::ZERO);

        match (self.timeout.is_zero(), sandbox_timeout.is_zero()) {
            (false, false) => self.timeout.min(sandbox_timeout),
            (false, true) => self.timeout,
            (true, false) => sandbox_timeout,
            (true, true) => Duration::ZERO,
        }
    }
}
