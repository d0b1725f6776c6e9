// conductor-sandbox/src/lib.rs
// ============================================================================
// Module: Conductor Sandbox
// Description: Worktree-confined tool execution and the ordered policy
//              pre-check gating every agent tool call (§4.7 Tool Sandbox).
// Purpose: The single choke point between agent-generated tool calls and a
//          run's worktree on disk.
// Dependencies: cap-std, cap-primitives, conductor-core, conductor-config
// ============================================================================

//! ## Overview
//! Every agent tool call passes through a [`tool::Sandbox`] before it
//! touches a worktree: [`path_safety`] rejects anything that would read or
//! write outside the worktree boundary (including through a symlink),
//! [`policy`] runs the ordered, data-driven rule registry from the run's
//! active `PolicySet`, and [`audit`] records what happened without ever
//! persisting raw sensitive content. [`test_detect`] supplies a default
//! `run_tests` command when a run has not configured one explicitly.

pub mod audit;
pub mod errors;
pub mod path_safety;
pub mod policy;
pub mod test_detect;
pub mod tool;

pub use errors::SandboxError;
pub use policy::PolicyDecision;
pub use policy::PolicyRuleKind;
pub use policy::ToolCallFacts;
pub use tool::Sandbox;
pub use tool::ToolCall;
pub use tool::ToolResult;
