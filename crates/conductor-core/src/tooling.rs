// conductor-core/src/tooling.rs
// ============================================================================
// Module: Tooling Identifiers
// Description: Canonical sandbox tool identifiers agents invoke (§4.7 Tool
//              Sandbox).
// Purpose: Shared tool naming across the sandbox, policy rules, and the
//          `tool_invocation` audit record.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Agents interact with the worktree through exactly these tools; nothing
//! else is reachable from agent code. Each is policy-checked before
//! execution (§4.7 "Policy pre-check") and redaction-logged after
//! (§4.7 "Redact and persist").

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Canonical tool names exposed to agents by the sandbox (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Read a file's contents, subject to output truncation.
    ReadFile,
    /// Write (create or overwrite) a file.
    WriteFile,
    /// Delete a file.
    DeleteFile,
    /// List files under a directory.
    ListFiles,
    /// Run the project's test suite (or an explicit command).
    RunTests,
}

impl ToolName {
    /// Returns the canonical string name for the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::DeleteFile => "delete_file",
            Self::ListFiles => "list_files",
            Self::RunTests => "run_tests",
        }
    }

    /// Returns all sandbox tool names in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::ReadFile, Self::WriteFile, Self::DeleteFile, Self::ListFiles, Self::RunTests]
    }

    /// Returns whether this tool mutates the worktree, as opposed to only
    /// reading it.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::WriteFile | Self::DeleteFile)
    }

    /// Parses a tool name from its string representation.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "read_file" => Some(Self::ReadFile),
            "write_file" => Some(Self::WriteFile),
            "delete_file" => Some(Self::DeleteFile),
            "list_files" => Some(Self::ListFiles),
            "run_tests" => Some(Self::RunTests),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
