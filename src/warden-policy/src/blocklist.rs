//! Blocklist matching.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use crate::config::PolicyConfig;
use crate::error::SecurityError;
use crate::segments::{leading_command, normalize, split_segments};

/// Compiled blocklist: command names, normalized substrings and
/// user-supplied regexes.
#[derive(Debug, Clone, Default)]
pub struct BlocklistMatcher {
    names: HashSet<String>,
    substrings: Vec<String>,
    patterns: Vec<Regex>,
}

impl BlocklistMatcher {
    pub fn new(config: &PolicyConfig) -> Self {
        let names = config
            .blocklist
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        let substrings = config
            .blocked_substrings
            .iter()
            .map(|s| normalize(s))
            .filter(|s| !s.is_empty())
            .collect();

        let patterns = compile_patterns(&config.blocklist_patterns, "blocklist");

        Self {
            names,
            substrings,
            patterns,
        }
    }

    /// Check the full command text.
    pub fn check(&self, text: &str) -> Result<(), SecurityError> {
        for segment in split_segments(text) {
            if let Some(name) = leading_command(segment)
                && self.names.contains(&name)
            {
                return Err(SecurityError::blocked(
                    format!("command '{name}' is blocked"),
                    text,
                ));
            }
        }

        let normalized = normalize(text);
        if let Some(hit) = self.substrings.iter().find(|s| normalized.contains(s.as_str())) {
            return Err(SecurityError::blocked(
                format!("command contains blocked sequence '{hit}'"),
                text,
            ));
        }

        if let Some(re) = self.patterns.iter().find(|re| re.is_match(text)) {
            return Err(SecurityError::blocked(
                format!("command matches blocked pattern '{}'", re.as_str()),
                text,
            ));
        }

        Ok(())
    }

    /// Whether `text` contains a blocked substring or pattern, ignoring the
    /// command-name list.
    pub fn matches_content(&self, text: &str) -> bool {
        let normalized = normalize(text);
        self.substrings
            .iter()
            .any(|s| normalized.contains(s.as_str()))
            || self.patterns.iter().any(|re| re.is_match(text))
    }
}

/// Compile user-supplied regexes case-insensitively, skipping invalid ones.
pub(crate) fn compile_patterns(sources: &[String], list: &str) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|source| match Regex::new(&format!("(?i){source}")) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(list, pattern = %source, error = %e, "skipping invalid pattern");
                None
            }
        })
        .collect()
}
