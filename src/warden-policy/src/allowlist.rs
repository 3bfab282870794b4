//! Allowlist matching for the strict modes.

use std::collections::HashSet;

use regex::Regex;

use crate::blocklist::compile_patterns;
use crate::config::{AllowlistMode, PolicyConfig};
use crate::error::SecurityError;
use crate::segments::{leading_command, split_segments};

/// Compiled allowlist.
#[derive(Debug, Clone, Default)]
pub struct AllowlistMatcher {
    mode: AllowlistMode,
    names: HashSet<String>,
    prefixes: Vec<String>,
    patterns: Vec<Regex>,
}

impl AllowlistMatcher {
    pub fn new(config: &PolicyConfig) -> Self {
        let names = config
            .allowlist
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        let prefixes = match config.allowlist_mode {
            AllowlistMode::Prefix | AllowlistMode::Pattern => config
                .allowlist_prefixes
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let patterns = match config.allowlist_mode {
            AllowlistMode::Pattern => compile_patterns(&config.allowlist_patterns, "allowlist"),
            _ => Vec::new(),
        };

        Self {
            mode: config.allowlist_mode,
            names,
            prefixes,
            patterns,
        }
    }

    pub fn mode(&self) -> AllowlistMode {
        self.mode
    }

    /// Every chained segment must lead with an allowed command.
    pub fn check(&self, text: &str) -> Result<(), SecurityError> {
        if self.mode == AllowlistMode::Disabled {
            return Ok(());
        }

        if self.patterns.iter().any(|re| re.is_match(text)) {
            return Ok(());
        }

        for segment in split_segments(text) {
            let Some(name) = leading_command(segment) else {
                continue;
            };
            if !self.allows(&name) {
                return Err(SecurityError::not_allowed(
                    format!("command '{name}' is not in the allowlist"),
                    text,
                ));
            }
        }

        Ok(())
    }

    fn allows(&self, name: &str) -> bool {
        self.names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}
