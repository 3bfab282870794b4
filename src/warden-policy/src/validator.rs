//! The command validator.

use std::path::Path;

use tracing::debug;
use warden_protocol::Command;

use crate::allowlist::AllowlistMatcher;
use crate::blocklist::BlocklistMatcher;
use crate::config::{AllowlistMode, PolicyConfig};
use crate::error::{SecurityError, SecurityErrorKind};
use crate::patterns::DangerousPatterns;
use crate::sanitize::is_valid_work_dir;

/// Security gate applied before any process is created.
///
/// Construction never fails: invalid user regexes are logged and skipped.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    blocklist: BlocklistMatcher,
    allowlist: AllowlistMatcher,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl CommandValidator {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            blocklist: BlocklistMatcher::new(config),
            allowlist: AllowlistMatcher::new(config),
        }
    }

    pub fn allowlist_mode(&self) -> AllowlistMode {
        self.allowlist.mode()
    }

    /// Validate a full command: text, explicit arguments and working
    /// directory.
    pub fn validate(&self, command: &Command) -> Result<(), SecurityError> {
        self.validate_text(&command.command)?;
        self.validate_args(&command.command, &command.args)?;
        if let Some(dir) = &command.work_dir {
            self.validate_work_dir(&command.command, dir)?;
        }
        debug!(id = %command.id, "command passed validation");
        Ok(())
    }

    /// Validate raw command text.
    pub fn validate_text(&self, text: &str) -> Result<(), SecurityError> {
        if text.trim().is_empty() {
            return Err(SecurityError::not_allowed("empty command", text));
        }

        self.blocklist.check(text)?;

        if let Some(description) = DangerousPatterns::find(text) {
            return Err(SecurityError::dangerous_pattern(
                format!("dangerous command detected: {description}"),
                text,
            ));
        }

        self.allowlist.check(text)
    }

    fn validate_args(&self, text: &str, args: &[String]) -> Result<(), SecurityError> {
        for arg in args {
            if let Some(description) = DangerousPatterns::find(arg) {
                return Err(SecurityError::new(
                    SecurityErrorKind::DangerousArgument,
                    format!("argument '{arg}' is dangerous: {description}"),
                    text,
                ));
            }
            if self.blocklist.matches_content(arg) {
                return Err(SecurityError::new(
                    SecurityErrorKind::DangerousArgument,
                    format!("argument '{arg}' contains a blocked sequence"),
                    text,
                ));
            }
        }
        Ok(())
    }

    fn validate_work_dir(&self, text: &str, dir: &Path) -> Result<(), SecurityError> {
        if dir.as_os_str().is_empty() || is_valid_work_dir(dir) {
            return Ok(());
        }
        Err(SecurityError::new(
            SecurityErrorKind::InvalidWorkdir,
            format!("invalid working directory '{}'", dir.display()),
            text,
        ))
    }
}
