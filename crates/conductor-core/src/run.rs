// crates/conductor-core/src/run.rs
// ============================================================================
// Module: Run Projection
// Description: The run's phase/step projection, derived exclusively from
//              decision-class events (§3 Run, §4.2 Run Projection & State Machine).
// Purpose: Model the single execution attempt against a task end to end.
// Dependencies: serde
// ============================================================================

use crate::ids::ArtifactId;
use crate::ids::ProjectId;
use crate::ids::RepoId;
use crate::ids::RunId;
use crate::ids::TaskId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Phase & Step
// ============================================================================

/// Coarse lifecycle state of a run (§3 Run `phase`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created, not yet dispatched.
    Pending,
    /// Planner is producing a PLAN artifact.
    Planning,
    /// Waiting on the operator to approve, revise, or reject the plan.
    AwaitingPlanApproval,
    /// Implementer/tester/reviewer are iterating on the change.
    Executing,
    /// Waiting on the PR to be reviewed and merged upstream.
    AwaitingReview,
    /// Unrecoverable system state; requires operator intervention.
    Blocked,
    /// Terminal: the run finished, successfully or not.
    Completed,
    /// Terminal: the run was cancelled.
    Cancelled,
}

impl RunPhase {
    /// Returns whether this phase is terminal. Terminal runs never re-enter
    /// a non-terminal phase (§3 "Ownership and lifecycle").
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Cancelled)
    }

    /// Returns whether this phase is a healthy wait for human input, as
    /// opposed to [`RunPhase::Blocked`] (§4.2 "Blocked vs awaiting_*").
    #[must_use]
    pub fn is_awaiting(self) -> bool {
        matches!(self, RunPhase::AwaitingPlanApproval | RunPhase::AwaitingReview)
    }

    /// Returns whether a blocked run may retry back into this phase
    /// (§4.2 "Blocked-retry resolution" step 1).
    #[must_use]
    pub fn is_retryable_from_blocked(self) -> bool {
        matches!(self, RunPhase::Planning | RunPhase::Executing | RunPhase::AwaitingReview)
    }
}

/// Sub-phase label used to dispatch the next job (§4.5 "Dispatch routing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    /// Provision the isolated worktree and branch.
    SetupWorktree,
    /// Planner agent produces the PLAN artifact.
    PlannerCreatePlan,
    /// Reviewer agent reviews the plan before operator approval.
    ReviewerReviewPlan,
    /// Parked waiting for `approve_plan` / `revise_plan` / `reject_and_cancel`.
    WaitPlanApproval,
    /// Implementer agent applies the planned changes.
    ImplementerApplyChanges,
    /// Test runner executes the project's test suite.
    TesterRunTests,
    /// Reviewer agent reviews the resulting code.
    ReviewerReviewCode,
    /// Outbox creates the pull request.
    CreatePr,
    /// Parked waiting for a "PR merged"/"PR closed" webhook fact.
    WaitPrMerge,
    /// Worktree and port lease teardown.
    Cleanup,
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

/// An evidenced milestone a blocked run's retry may resume from
/// (§4.2 "Checkpoints").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Evidence: `worktree_id`. No anchor — a worktree either exists or not.
    EnvironmentReady,
    /// Evidence: `artifact_id` (PLAN). No anchor.
    PlanningComplete,
    /// Evidence: `operator_action_id`. No anchor.
    PlanApproved,
    /// Evidence: `head_sha`. Anchor: `head_sha` unchanged.
    ImplementationComplete,
    /// Evidence: `head_sha`, `gate_evaluation_id`. Anchor: `head_sha` unchanged.
    TestsPassed,
    /// Evidence: `pr_number`, `head_sha`. Anchor: PR open and `head_sha` unchanged.
    PrCreated,
}

/// A recorded checkpoint with its evidence and the anchor value captured at
/// the time it was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Which canonical checkpoint this is.
    pub kind: CheckpointKind,
    /// Evidence payload (`worktree_id`, `artifact_id`, `head_sha`, ...).
    pub evidence: Value,
    /// The anchor value recorded at checkpoint time (e.g. `head_sha`), if
    /// this checkpoint kind has one.
    pub anchor: Option<String>,
    /// When the checkpoint was recorded.
    pub recorded_at: Timestamp,
}

impl Checkpoint {
    /// Returns whether the checkpoint is still valid given the run's
    /// current anchor value. A checkpoint with no anchor is always valid;
    /// one with an anchor is valid only if `current_anchor` matches.
    #[must_use]
    pub fn is_valid(&self, current_anchor: Option<&str>) -> bool {
        match &self.anchor {
            None => true,
            Some(recorded) => current_anchor == Some(recorded.as_str()),
        }
    }
}

// ============================================================================
// SECTION: Blocked Context
// ============================================================================

/// Structured context attached to every blocked run
/// (§7 "User-visible behavior").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedContext {
    /// Human-readable reason shown to the operator without reading the log.
    pub reason: String,
    /// The phase the run was in before it was blocked.
    pub prior_phase: Option<RunPhase>,
    /// The step the run was in before it was blocked.
    pub prior_step: Option<RunStep>,
    /// Free-form diagnostic payload (error details, policy rule name, ...).
    pub diagnostics: Value,
}

// ============================================================================
// SECTION: PR Bundle
// ============================================================================

/// The run's pull request identifiers. Either all five fields are present
/// or none are (§3 "all-or-nothing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrBundle {
    /// Host-assigned PR number.
    pub pr_number: i64,
    /// Host-assigned opaque node id.
    pub pr_node_id: String,
    /// Canonical URL to the PR.
    pub pr_url: String,
    /// Host-reported PR state (e.g. `open`, `merged`, `closed`).
    pub pr_state: String,
    /// When this bundle was last refreshed from the host.
    pub pr_synced_at: Timestamp,
}

// ============================================================================
// SECTION: Iteration Counters
// ============================================================================

/// Per-run iteration counters (§3 "Iteration counters").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IterationCounters {
    /// Number of times the plan has been revised.
    pub plan_revisions: u32,
    /// Number of test-fix attempts by the implementer.
    pub test_fix_attempts: u32,
    /// Number of review rounds completed.
    pub review_rounds: u32,
}

// ============================================================================
// SECTION: Result
// ============================================================================

/// The run's terminal outcome (§3 Run `result`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// The run completed and landed its change.
    Success,
    /// The run completed without landing a change.
    Failure,
    /// The run was cancelled before completion.
    Cancelled,
}

// ============================================================================
// SECTION: Run
// ============================================================================

/// A single execution attempt against a task (§3 Run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Primary key.
    pub run_id: RunId,
    /// The task this run attempts.
    pub task_id: TaskId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning repo.
    pub repo_id: RepoId,

    /// Sequential run number within the owning task.
    pub run_number: i64,
    /// The run this one was retried/re-spawned from, if any.
    pub parent_run_id: Option<RunId>,
    /// The run this one supersedes (e.g. after a stale retry race), if any.
    pub supersedes_run_id: Option<RunId>,

    /// Current coarse lifecycle phase.
    pub phase: RunPhase,
    /// Current dispatch sub-phase.
    pub step: RunStep,

    /// Next sequence number to allocate for this run's events. Starts at 1.
    pub next_sequence: i64,
    /// Highest sequence number processed so far.
    pub last_event_sequence: i64,

    /// Set when an operator pauses a healthy run. Independent of `phase`.
    pub paused_at: Option<Timestamp>,
    /// The operator who paused the run.
    pub paused_by: Option<String>,

    /// Present iff `phase == Blocked`.
    pub blocked_context: Option<BlockedContext>,

    /// Base branch the run's branch was cut from.
    pub base_branch: String,
    /// The run's working branch.
    pub branch: Option<String>,
    /// Current commit SHA at the tip of `branch`.
    pub head_sha: Option<String>,

    /// Pull request identifiers, all-or-nothing.
    pub pr_bundle: Option<PrBundle>,

    /// Iteration counters.
    pub iterations: IterationCounters,

    /// Terminal outcome, set only once `phase` is terminal.
    pub result: Option<RunResult>,
    /// Human-readable explanation of `result`.
    pub result_reason: Option<String>,

    /// Checkpoints reached so far, most recent last.
    pub checkpoints: Vec<Checkpoint>,

    /// Identifiers of artifacts produced by this run (for convenience;
    /// authoritative ownership lives in the `artifacts` table).
    pub artifact_ids: Vec<ArtifactId>,

    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run was last updated.
    pub updated_at: Timestamp,
}

/// The derived run view exposed to operators (§3 "Derived run view", never
/// stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Healthy and making progress, or awaiting operator input.
    Active,
    /// Operator-paused.
    Paused,
    /// Unrecoverable state requiring intervention.
    Blocked,
    /// Terminal.
    Finished,
}

impl Run {
    /// Derives [`RunStatus`] from phase and pause state
    /// (§3 "Derived run view").
    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.phase.is_terminal() {
            RunStatus::Finished
        } else if self.paused_at.is_some() {
            RunStatus::Paused
        } else if self.phase == RunPhase::Blocked {
            RunStatus::Blocked
        } else {
            RunStatus::Active
        }
    }

    /// Returns the most recent valid checkpoint given the run's current
    /// anchor candidates (§4.2 "Retry from `blocked` resumes from the most
    /// recent valid checkpoint").
    #[must_use]
    pub fn latest_valid_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|checkpoint| checkpoint.is_valid(self.head_sha.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::Checkpoint;
    use super::CheckpointKind;
    use super::RunPhase;
    use super::RunStatus;
    use crate::time::Timestamp;
    use serde_json::json;

    #[test]
    fn terminal_phases_report_finished_status_regardless_of_pause() {
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::Executing.is_terminal());
    }

    #[test]
    fn awaiting_and_blocked_are_distinct() {
        assert!(RunPhase::AwaitingPlanApproval.is_awaiting());
        assert!(!RunPhase::Blocked.is_awaiting());
    }

    #[test]
    fn checkpoint_with_anchor_invalidates_on_mismatch() {
        let checkpoint = Checkpoint {
            kind: CheckpointKind::TestsPassed,
            evidence: json!({"head_sha": "abc123"}),
            anchor: Some("abc123".to_string()),
            recorded_at: Timestamp::now(),
        };
        assert!(checkpoint.is_valid(Some("abc123")));
        assert!(!checkpoint.is_valid(Some("def456")));
    }

    #[test]
    fn checkpoint_without_anchor_is_always_valid() {
        let checkpoint = Checkpoint {
            kind: CheckpointKind::EnvironmentReady,
            evidence: json!({"worktree_id": "wt_1"}),
            anchor: None,
            recorded_at: Timestamp::now(),
        };
        assert!(checkpoint.is_valid(None));
        assert!(checkpoint.is_valid(Some("anything")));
    }

    #[test]
    fn status_derivation_prefers_finished_then_paused_then_blocked() {
        assert_eq!(
            derive_status(RunPhase::Completed, true, false),
            RunStatus::Finished
        );
        assert_eq!(derive_status(RunPhase::Executing, false, true), RunStatus::Paused);
        assert_eq!(derive_status(RunPhase::Blocked, false, false), RunStatus::Blocked);
        assert_eq!(derive_status(RunPhase::Executing, false, false), RunStatus::Active);
    }

    fn derive_status(phase: RunPhase, terminal_hint: bool, paused: bool) -> RunStatus {
        let _ = terminal_hint;
        if phase.is_terminal() {
            RunStatus::Finished
        } else if paused {
            RunStatus::Paused
        } else if phase == RunPhase::Blocked {
            RunStatus::Blocked
        } else {
            RunStatus::Active
        }
    }
}
