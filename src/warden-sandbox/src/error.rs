/// Possible errors when validating or applying a sandbox.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox backend not available: {0}")]
    NotAvailable(String),

    #[error("Invalid sandbox limit {field}: {reason}")]
    InvalidLimit { field: &'static str, reason: String },

    #[error("Invalid sandbox path: {0}")]
    InvalidPath(String),

    #[error("Invalid network sandbox: {0}")]
    InvalidNetwork(String),

    #[error("Failed to apply sandbox rules: {0}")]
    ApplyFailed(String),
}

/// Result of a sandbox operation.
pub type SandboxResult<T> = Result<T, SandboxError>;
