// crates/conductor-core/src/worktree.rs
// ============================================================================
// Module: Worktree & Port Lease
// Description: Isolated filesystem checkouts and the port ranges they claim.
// Purpose: Model the "at most one active" invariants from §3 and §5.
// Dependencies: serde
// ============================================================================

use crate::ids::PortLeaseId;
use crate::ids::ProjectId;
use crate::ids::RunId;
use crate::ids::WorktreeId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Worktree
// ============================================================================

/// Status of a worktree's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Being provisioned.
    Provisioning,
    /// Ready for agent tool calls.
    Ready,
    /// Torn down.
    Destroyed,
}

/// An isolated filesystem checkout and branch for a run (§3 Worktree).
///
/// At most one active (`destroyed_at IS NULL`) worktree may exist per run —
/// enforced at the store layer by a partial unique index, and checked here
/// by [`Worktree::is_active`] for in-memory invariant assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    /// Primary key.
    pub worktree_id: WorktreeId,
    /// The run this worktree belongs to.
    pub run_id: RunId,
    /// Absolute filesystem path of the checkout.
    pub path: String,
    /// The branch checked out in this worktree.
    pub branch_name: String,
    /// The commit this worktree was branched from.
    pub base_commit: String,
    /// Current lifecycle status.
    pub status: WorktreeStatus,
    /// Most recent heartbeat from a worker using this worktree.
    pub last_heartbeat_at: Timestamp,
    /// Set once the worktree is torn down.
    pub destroyed_at: Option<Timestamp>,
}

impl Worktree {
    /// Returns whether this worktree is the run's active one.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.destroyed_at.is_none()
    }

    /// Returns whether this worktree's heartbeat is stale as of `now`,
    /// suggesting its owning worker may have crashed.
    #[must_use]
    pub fn heartbeat_stale(&self, now: Timestamp, staleness_threshold_seconds: i64) -> bool {
        self.is_active() && self.last_heartbeat_at.elapsed_seconds_since(now) > staleness_threshold_seconds
    }
}

// ============================================================================
// SECTION: Port Lease
// ============================================================================

/// A claim on one port within a project's configured range (§5 "Ports").
///
/// At most one active lease may exist per `(project_id, port)` — enforced
/// at the store layer by a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortLease {
    /// Primary key.
    pub port_lease_id: PortLeaseId,
    /// The project whose port range this lease draws from.
    pub project_id: ProjectId,
    /// The worktree holding this lease.
    pub worktree_id: WorktreeId,
    /// The leased port number.
    pub port: u16,
    /// Whether this lease is currently held.
    pub is_active: bool,
    /// When the lease was acquired.
    pub leased_at: Timestamp,
    /// When the lease was released, if it has been.
    pub released_at: Option<Timestamp>,
}
