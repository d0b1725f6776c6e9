// conductor-sandbox/src/errors.rs
// ============================================================================
// Module: Sandbox Error Taxonomy
// Description: The public error boundary for every sandbox operation.
// Purpose: Map policy blocks, path-safety violations, and I/O failures onto
//          the shared `ErrorKind` taxonomy.
// Dependencies: conductor-core, thiserror
// ============================================================================

use conductor_core::errors::ErrorKind;
use thiserror::Error;

/// Errors raised by `conductor-sandbox`'s policy engine and tool dispatcher.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A policy rule blocked the call before it touched the filesystem.
    #[error("blocked by policy rule {rule_name}: {reason}")]
    PolicyBlocked {
        /// The rule that blocked the call.
        rule_name: String,
        /// Human-readable reason, echoed into the audit record.
        reason: String,
    },

    /// The requested path resolves outside the worktree boundary, whether
    /// directly (`../`) or via a symlink.
    #[error("path escapes worktree boundary: {path}")]
    PathEscape {
        /// The path as requested by the tool call.
        path: String,
    },

    /// A filesystem operation failed.
    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),

    /// No test command could be auto-detected and none was configured.
    #[error("could not detect a test command for this worktree")]
    NoTestCommandDetected,
}

impl SandboxError {
    /// Maps this error to its stable [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::PolicyBlocked { .. } | SandboxError::PathEscape { .. } => ErrorKind::PolicyBlock,
            SandboxError::Io(_) => ErrorKind::Transient,
            SandboxError::NoTestCommandDetected => ErrorKind::ArtifactInvalid,
        }
    }
}
