//! Policy configuration.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// How the allowlist is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AllowlistMode {
    /// Only exact command names are allowed.
    Strict,
    /// Exact names plus configured prefixes.
    Prefix,
    /// Exact names, prefixes, plus regexes over the full command text.
    Pattern,
    /// No allowlist, only the blocklist and dangerous patterns apply.
    #[default]
    Disabled,
}

/// Configuration for the command validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allowlist_mode: AllowlistMode,

    /// Command names (basenames) allowed in strict modes.
    pub allowlist: Vec<String>,

    /// Command name prefixes allowed in `prefix` and `pattern` modes.
    pub allowlist_prefixes: Vec<String>,

    /// Regexes over the full command text allowed in `pattern` mode.
    pub allowlist_patterns: Vec<String>,

    /// Command names rejected wherever they lead a chained segment.
    pub blocklist: Vec<String>,

    /// Substrings rejected anywhere in the normalized command text.
    pub blocked_substrings: Vec<String>,

    /// Regexes rejected anywhere in the command text.
    pub blocklist_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowlist_mode: AllowlistMode::Disabled,
            allowlist: Self::default_allowlist(),
            allowlist_prefixes: Vec::new(),
            allowlist_patterns: Vec::new(),
            blocklist: Self::default_blocklist(),
            blocked_substrings: Self::default_blocked_substrings(),
            blocklist_patterns: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Strict allowlist with only the given commands.
    pub fn strict(allowed: &[&str]) -> Self {
        Self {
            allowlist_mode: AllowlistMode::Strict,
            allowlist: allowed.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: AllowlistMode) -> Self {
        self.allowlist_mode = mode;
        self
    }

    pub fn allow(mut self, command: impl Into<String>) -> Self {
        self.allowlist.push(command.into());
        self
    }

    pub fn allow_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowlist_prefixes.push(prefix.into());
        self
    }

    pub fn allow_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.allowlist_patterns.push(pattern.into());
        self
    }

    pub fn block(mut self, command: impl Into<String>) -> Self {
        self.blocklist.push(command.into());
        self
    }

    pub fn block_substring(mut self, substring: impl Into<String>) -> Self {
        self.blocked_substrings.push(substring.into());
        self
    }

    pub fn block_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.blocklist_patterns.push(pattern.into());
        self
    }

    /// Commands typically needed by a coding agent.
    pub fn default_allowlist() -> Vec<String> {
        [
            "ls", "cat", "grep", "find", "git", "npm", "go", "python", "python3", "node", "make",
            "cargo", "docker", "kubectl", "echo", "printf", "pwd", "which", "whoami", "date",
            "head", "tail", "wc", "sort", "uniq", "cut", "sed", "awk", "tr", "tee", "xargs", "env",
            "export", "cd", "mkdir", "touch", "cp", "mv", "diff", "patch", "tar", "gzip", "gunzip",
            "zip", "unzip", "curl", "wget", "ssh", "scp", "rsync", "sleep", "exit", "test", "true",
            "false", "for", "while", "if", "sh", "bash",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Commands that are never run.
    pub fn default_blocklist() -> Vec<String> {
        [
            "mkfs", "fdisk", "parted", "shutdown", "reboot", "halt", "poweroff", "format",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Known-destructive invocations, matched after lowercasing and
    /// collapsing whitespace.
    pub fn default_blocked_substrings() -> Vec<String> {
        [
            "rm -rf /",
            "rm -fr /",
            ":(){ :|:& };:",
            "> /dev/sd",
            "dd if=/dev/zero",
            "dd if=/dev/random",
            "chmod -r 777 /",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}
