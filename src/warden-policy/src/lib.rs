#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]
//! Shellwarden Policy - the security gate in front of process creation.
//!
//! Two pieces live here:
//! - [`CommandValidator`] rejects commands before any process exists
//! - [`sanitize_path`] / [`sanitize_env`] clean the working directory and
//!   environment overrides before they reach a process
//!
//! # Validation order
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────┐   ┌───────────┐   ┌─────────┐
//! │  blocklist   │ → │ dangerous pattern│ → │ allowlist │ → │ arguments │ → │ workdir │
//! │  (blocked)   │   │(dangerous_pattern│   │(not_allowed   │(dangerous_│   │(invalid_│
//! └──────────────┘   └──────────────────┘   └───────────┘   │ argument) │   │ workdir)│
//!                                                           └───────────┘   └─────────┘
//! ```
//!
//! Every rule runs over the whole command text, so chained sub-commands
//! (`a && b`, `a; b`, `a | b`) are inspected too.
//!
//! # Limits
//!
//! This is a heuristic gate. Substring and pattern matching will not catch
//! payloads that are encoded and decoded at runtime (`echo ... | base64 -d | sh`
//! with an innocuous-looking payload), indirect variable expansion, or
//! aliases. It is not an isolation boundary; pair it with a sandbox backend
//! when real containment is required.

mod allowlist;
mod blocklist;
mod config;
mod error;
mod patterns;
mod sanitize;
mod segments;
mod validator;


pub use allowlist::AllowlistMatcher;
pub use blocklist::BlocklistMatcher;
pub use config::{AllowlistMode, PolicyConfig};
pub use error::{SecurityError, SecurityErrorKind};
pub use patterns::DangerousPatterns;
pub use sanitize::{
    is_valid_env_key, is_valid_work_dir, sanitize_env, sanitize_env_value, sanitize_path,
};
pub use validator::CommandValidator;

/// Result alias for validation.
pub type Result<T> = std::result::Result<T, SecurityError>;
