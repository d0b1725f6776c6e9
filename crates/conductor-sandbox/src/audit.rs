// conductor-sandbox/src/audit.rs
// ============================================================================
// Module: Tool Invocation Audit
// Description: The redact-and-persist record written for every tool call,
//              blocked or not (§4.7 "Redact and persist").
// Purpose: Give operators a durable trail of what agents tried and were
//          allowed or refused to do, without ever storing raw sensitive
//          content.
// Dependencies: conductor-core, serde, sha2
// ============================================================================

use conductor_core::hashing::HashAlgorithm;
use conductor_core::hashing::hash_bytes;
use conductor_core::ids::RunId;
use conductor_core::time::Timestamp;
use conductor_core::tooling::ToolName;
use serde::Deserialize;
use serde::Serialize;

use crate::policy::PolicyDecision;

/// Truncation marker appended when output is cut for the audit record or
/// the tool result itself (§4.7 "Output truncation").
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// A durable record of one tool call: what was asked, whether policy
/// allowed it, and a redacted summary of what happened. Written regardless
/// of outcome, including for calls a policy rule blocked before they
/// touched the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    /// The run this invocation belongs to.
    pub run_id: RunId,
    /// Which tool was invoked.
    pub tool: ToolName,
    /// The worktree-relative path involved, if any.
    pub path: Option<String>,
    /// The command string, for `run_tests` calls.
    pub command: Option<String>,
    /// Whether the policy pre-check allowed the call.
    pub allowed: bool,
    /// The rule name that blocked the call, if any.
    pub blocking_rule: Option<String>,
    /// SHA-256 of the content involved (write payload or command output),
    /// never the content itself.
    pub content_hash: Option<String>,
    /// Number of bytes in the original content, before any truncation.
    pub content_byte_len: Option<usize>,
    /// Whether the persisted output was truncated.
    pub truncated: bool,
    /// When this invocation was recorded.
    pub occurred_at: Timestamp,
}

impl ToolInvocationRecord {
    /// Builds an audit record for a call the policy engine allowed.
    #[must_use]
    pub fn allowed(
        run_id: RunId,
        tool: ToolName,
        path: Option<String>,
        command: Option<String>,
        content: Option<&[u8]>,
        truncated: bool,
    ) -> Self {
        Self {
            run_id,
            tool,
            path,
            command,
            allowed: true,
            blocking_rule: None,
            content_hash: content.map(content_hash),
            content_byte_len: content.map(<[u8]>::len),
            truncated,
            occurred_at: Timestamp::now(),
        }
    }

    /// Builds an audit record for a call a policy rule blocked.
    #[must_use]
    pub fn blocked(
        run_id: RunId,
        tool: ToolName,
        path: Option<String>,
        command: Option<String>,
        decision: &PolicyDecision,
    ) -> Self {
        let blocking_rule = match decision {
            PolicyDecision::Block { rule_name, .. } => Some(rule_name.clone()),
            PolicyDecision::Allow => None,
        };
        Self {
            run_id,
            tool,
            path,
            command,
            allowed: false,
            blocking_rule,
            content_hash: None,
            content_byte_len: None,
            truncated: false,
            occurred_at: Timestamp::now(),
        }
    }
}

/// Truncates `output` to at most `max_bytes`, keeping the head and tail and
/// splicing [`TRUNCATION_MARKER`] between them so operators still see both
/// the start of a failure and its final error line
/// (§4.7 "head/tail truncation").
#[must_use]
pub fn truncate_output(output: &[u8], max_bytes: usize) -> (Vec<u8>, bool) {
    if output.len() <= max_bytes {
        return (output.to_vec(), false);
    }
    let half = max_bytes / 2;
    let mut truncated = Vec::with_capacity(max_bytes + TRUNCATION_MARKER.len());
    truncated.extend_from_slice(&output[..half]);
    truncated.extend_from_slice(TRUNCATION_MARKER.as_bytes());
    truncated.extend_from_slice(&output[output.len() - half..]);
    (truncated, true)
}

fn content_hash(content: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, content).value
}
