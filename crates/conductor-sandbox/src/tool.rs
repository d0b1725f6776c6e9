// conductor-sandbox/src/tool.rs
// ============================================================================
// Module: Tool Dispatch
// Description: Mediates every agent tool call: policy pre-check, path-safety
//              resolution, confined filesystem access, output truncation,
//              and audit recording (§4.7 Tool Sandbox).
// Purpose: The single choke point agent code goes through to touch a
//          worktree; nothing reaches the filesystem except through here.
// Dependencies: cap-std, cap-primitives, conductor-core, conductor-config
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use conductor_config::SandboxSettings;
use conductor_core::ids::RunId;
use conductor_core::policy::PolicySet;
use conductor_core::tooling::ToolName;
use tracing::info;
use tracing::warn;

use crate::audit::ToolInvocationRecord;
use crate::audit::truncate_output;
use crate::errors::SandboxError;
use crate::path_safety::resolve_in_worktree;
use crate::policy::PolicyDecision;
use crate::policy::ToolCallFacts;
use crate::policy::evaluate as evaluate_policy;
use crate::test_detect::detect_test_command;

/// One agent tool call, as received from the agent runtime.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Which tool is being invoked.
    pub tool: ToolName,
    /// The worktree-relative path involved, for file tools.
    pub path: Option<String>,
    /// The bytes to write, for `write_file`.
    pub content: Option<Vec<u8>>,
    /// An explicit command override, for `run_tests`. When `None`, the
    /// sandbox auto-detects a command (§4.7 "Auto-detection").
    pub command: Option<String>,
}

/// The outcome of a tool call that passed the policy pre-check.
#[derive(Debug, Clone)]
pub enum ToolResult {
    /// `read_file` succeeded; `content` may have been truncated.
    Read {
        /// The file's bytes, possibly truncated.
        content: Vec<u8>,
        /// Whether truncation happened.
        truncated: bool,
    },
    /// `write_file` or `delete_file` succeeded.
    Written,
    /// `list_files` succeeded.
    Listed {
        /// Worktree-relative entry names.
        entries: Vec<String>,
    },
    /// `run_tests` completed (regardless of exit status; a nonzero exit is
    /// a normal test-failure outcome, not a sandbox error).
    TestRun {
        /// Whether the command exited successfully.
        success: bool,
        /// Combined stdout/stderr, possibly truncated.
        output: Vec<u8>,
        /// Whether truncation happened.
        truncated: bool,
    },
}

/// Confines a run's agent tool calls to one worktree directory, enforcing
/// the policy pre-check ahead of every filesystem touch (§4.7).
pub struct Sandbox {
    run_id: RunId,
    worktree_root: PathBuf,
    confined_dir: Dir,
    settings: SandboxSettings,
}

impl Sandbox {
    /// Opens `worktree_root` under ambient authority, confining all
    /// subsequent filesystem access to within it.
    ///
    /// # Errors
    /// Returns [`SandboxError::Io`] if the directory cannot be opened.
    pub fn open(run_id: RunId, worktree_root: &Path, settings: SandboxSettings) -> Result<Self, SandboxError> {
        let confined_dir = Dir::open_ambient_dir(worktree_root, ambient_authority())?;
        Ok(Self { run_id, worktree_root: worktree_root.to_path_buf(), confined_dir, settings })
    }

    /// Evaluates `call` against `policy_set`, then, if allowed, executes it
    /// and returns both the result and the audit record to persist.
    ///
    /// # Errors
    /// Returns [`SandboxError::PathEscape`] or [`SandboxError::PolicyBlocked`]
    /// before touching the filesystem, or [`SandboxError::Io`] if the
    /// confined operation itself fails.
    pub fn dispatch(
        &self,
        call: &ToolCall,
        policy_set: &PolicySet,
    ) -> Result<(ToolResult, ToolInvocationRecord), SandboxError> {
        let relative_path = match &call.path {
            Some(path) => {
                resolve_in_worktree(&self.worktree_root, path)?;
                Some(path.as_str())
            }
            None => None,
        };

        let facts = ToolCallFacts {
            tool: call.tool,
            relative_path,
            command: call.command.as_deref(),
            content: call.content.as_deref(),
        };
        let decision = evaluate_policy(policy_set, &facts, &self.run_id);
        if let PolicyDecision::Block { rule_name, reason, .. } = &decision {
            warn!(run_id = %self.run_id, tool = %call.tool, rule = %rule_name, "tool call blocked by policy");
            return Err(SandboxError::PolicyBlocked { rule_name: rule_name.clone(), reason: reason.clone() });
        }

        let result = self.execute(call)?;
        let (content_for_audit, truncated) = audit_payload(&result);
        let record = ToolInvocationRecord::allowed(
            self.run_id.clone(),
            call.tool,
            call.path.clone(),
            call.command.clone(),
            content_for_audit.as_deref(),
            truncated,
        );
        info!(run_id = %self.run_id, tool = %call.tool, "tool call executed");
        Ok((result, record))
    }

    fn execute(&self, call: &ToolCall) -> Result<ToolResult, SandboxError> {
        match call.tool {
            ToolName::ReadFile => {
                let path = call.path.as_deref().ok_or_else(|| SandboxError::PathEscape { path: String::new() })?;
                let raw = self.confined_dir.read(path)?;
                let (content, truncated) = truncate_output(&raw, self.settings.max_read_output_bytes as usize);
                Ok(ToolResult::Read { content, truncated })
            }
            ToolName::WriteFile => {
                let path = call.path.as_deref().ok_or_else(|| SandboxError::PathEscape { path: String::new() })?;
                let content = call.content.as_deref().unwrap_or_default();
                if let Some(parent) = Path::new(path).parent().filter(|parent| !parent.as_os_str().is_empty()) {
                    self.confined_dir.create_dir_all(parent)?;
                }
                self.confined_dir.write(path, content)?;
                Ok(ToolResult::Written)
            }
            ToolName::DeleteFile => {
                let path = call.path.as_deref().ok_or_else(|| SandboxError::PathEscape { path: String::new() })?;
                self.confined_dir.remove_file(path)?;
                Ok(ToolResult::Written)
            }
            ToolName::ListFiles => {
                let path = call.path.as_deref().unwrap_or(".");
                let mut entries = Vec::new();
                for entry in self.confined_dir.read_dir(path)? {
                    let entry = entry?;
                    entries.push(entry.file_name().to_string_lossy().into_owned());
                }
                entries.sort();
                Ok(ToolResult::Listed { entries })
            }
            ToolName::RunTests => self.run_tests(call.command.as_deref()),
        }
    }

    fn run_tests(&self, explicit_command: Option<&str>) -> Result<ToolResult, SandboxError> {
        let argv: Vec<String> = match explicit_command {
            Some(command) => command.split_whitespace().map(str::to_string).collect(),
            None => detect_test_command(&self.worktree_root).ok_or(SandboxError::NoTestCommandDetected)?,
        };
        let Some((program, args)) = argv.split_first() else {
            return Err(SandboxError::NoTestCommandDetected);
        };

        let output = Command::new(program).args(args).current_dir(&self.worktree_root).output()?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let (truncated_output, truncated) = truncate_output(&combined, self.settings.max_test_output_bytes as usize);
        Ok(ToolResult::TestRun { success: output.status.success(), output: truncated_output, truncated })
    }
}

fn audit_payload(result: &ToolResult) -> (Option<Vec<u8>>, bool) {
    match result {
        ToolResult::Read { content, truncated } => (Some(content.clone()), *truncated),
        ToolResult::TestRun { output, truncated, .. } => (Some(output.clone()), *truncated),
        ToolResult::Written | ToolResult::Listed { .. } => (None, false),
    }
}

#[cfg(test)]
mod tests {
    use super::Sandbox;
    use super::ToolCall;
    use super::ToolResult;
    use conductor_config::SandboxSettings;
    use conductor_core::ids::PolicySetId;
    use conductor_core::ids::RunId;
    use conductor_core::policy::PolicySet;
    use conductor_core::policy::PolicySetEntry;
    use conductor_core::time::Timestamp;
    use conductor_core::tooling::ToolName;
    use std::fs;

    fn empty_policy_set() -> PolicySet {
        PolicySet {
            policy_set_id: PolicySetId::new("ps_1"),
            replaces_policy_set_id: None,
            entries: Vec::new(),
            created_at: Timestamp::now(),
        }
    }

    fn git_directory_policy_set() -> PolicySet {
        PolicySet {
            policy_set_id: PolicySetId::new("ps_2"),
            replaces_policy_set_id: None,
            entries: vec![PolicySetEntry {
                rule_name: "git_directory".to_string(),
                config: serde_json::json!({}),
                enabled: true,
            }],
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn write_then_read_round_trips_through_confined_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox =
            Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("sandbox opens");
        let policy = empty_policy_set();

        let write_call = ToolCall {
            tool: ToolName::WriteFile,
            path: Some("src/lib.rs".to_string()),
            content: Some(b"fn main() {}".to_vec()),
            command: None,
        };
        let (result, record) = sandbox.dispatch(&write_call, &policy).expect("write allowed");
        assert!(matches!(result, ToolResult::Written));
        assert!(record.allowed);

        let read_call =
            ToolCall { tool: ToolName::ReadFile, path: Some("src/lib.rs".to_string()), content: None, command: None };
        let (result, _) = sandbox.dispatch(&read_call, &policy).expect("read allowed");
        match result {
            ToolResult::Read { content, .. } => assert_eq!(content, b"fn main() {}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn policy_block_prevents_filesystem_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join(".git")).expect("mkdir");
        let sandbox =
            Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("sandbox opens");
        let policy = git_directory_policy_set();

        let write_call = ToolCall {
            tool: ToolName::WriteFile,
            path: Some(".git/config".to_string()),
            content: Some(b"[core]".to_vec()),
            command: None,
        };
        let err = sandbox.dispatch(&write_call, &policy).expect_err("must be blocked");
        assert!(matches!(err, super::SandboxError::PolicyBlocked { .. }));
        assert!(!dir.path().join(".git/config").exists());
    }

    #[test]
    fn path_escape_is_rejected_before_policy_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox =
            Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("sandbox opens");
        let policy = empty_policy_set();

        let read_call = ToolCall { tool: ToolName::ReadFile, path: Some("../secret".to_string()), content: None, command: None };
        let err = sandbox.dispatch(&read_call, &policy).expect_err("must be rejected");
        assert!(matches!(err, super::SandboxError::PathEscape { .. }));
    }

    #[test]
    fn list_files_returns_sorted_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.txt"), "b").expect("write");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let sandbox =
            Sandbox::open(RunId::new("run_1"), dir.path(), SandboxSettings::default()).expect("sandbox opens");
        let policy = empty_policy_set();

        let list_call = ToolCall { tool: ToolName::ListFiles, path: None, content: None, command: None };
        let (result, _) = sandbox.dispatch(&list_call, &policy).expect("list allowed");
        match result {
            ToolResult::Listed { entries } => assert_eq!(entries, vec!["a.txt".to_string(), "b.txt".to_string()]),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
