// crates/conductor-core/src/state_machine.rs
// ============================================================================
// Module: Run State Machine
// Description: The phase transition graph and blocked-retry resolution algorithm.
// Purpose: The single place that decides which `phase.transitioned` events are legal.
// Dependencies: (none beyond this crate)
// ============================================================================

//! The graph is intentionally a pure function of `(from, to)` with no I/O —
//! the orchestrator is the only caller, and it owns persistence. Keeping the
//! graph here lets both the orchestrator and its tests share one source of
//! truth instead of re-deriving the allowed edges ad hoc.

use crate::errors::CoreError;
use crate::run::RunPhase;
use crate::run::RunStep;

// ============================================================================
// SECTION: Transition Graph
// ============================================================================

/// Returns whether `from -> to` is a legal `phase.transitioned` edge.
///
/// This is the graph the orchestrator MUST consult before accepting any
/// `transitionPhase` call (§4.2 "`phase.transitioned` event").
#[must_use]
pub fn is_allowed_transition(from: RunPhase, to: RunPhase) -> bool {
    use RunPhase::{
        AwaitingPlanApproval, AwaitingReview, Blocked, Cancelled, Completed, Executing, Pending,
        Planning,
    };

    matches!(
        (from, to),
        (Pending, Planning)
            | (Planning, AwaitingPlanApproval)
            | (Planning, Blocked)
            | (AwaitingPlanApproval, Executing)
            | (AwaitingPlanApproval, Planning)
            | (AwaitingPlanApproval, Cancelled)
            | (Executing, AwaitingReview)
            | (Executing, Blocked)
            | (AwaitingReview, Completed)
            | (AwaitingReview, Blocked)
            | (AwaitingReview, Executing)
            | (Blocked, Planning)
            | (Blocked, Executing)
            | (Blocked, AwaitingReview)
            | (Blocked, Cancelled)
            | (Pending, Cancelled)
            | (Planning, Cancelled)
            | (Executing, Cancelled)
            | (AwaitingReview, Cancelled)
    )
}

/// Validates a requested transition against the graph and the CAS
/// precondition, returning the appropriate [`CoreError`] when either fails.
///
/// # Errors
/// - [`CoreError::IllegalTransition`] if `from -> to` is not in the graph.
/// - [`CoreError::StaleTransition`] if `current` does not match `from`
///   (the optimistic-lock miss described in §4.2 "Optimistic locking").
pub fn validate_transition(current: RunPhase, from: RunPhase, to: RunPhase) -> Result<(), CoreError> {
    if current != from {
        return Err(CoreError::StaleTransition {
            expected: format!("{from:?}"),
            actual: format!("{current:?}"),
        });
    }
    if !is_allowed_transition(from, to) {
        return Err(CoreError::IllegalTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Dispatch Routing
// ============================================================================

/// What kind of job a given `(phase, step)` dispatches to
/// (§4.5 "Dispatch routing").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    /// A run-management job (worktree setup, PR creation outbox kick, cleanup).
    RunJob(&'static str),
    /// An agent invocation job, named `role.action`.
    AgentJob(&'static str),
    /// No job to dispatch; waiting for an external event (operator action or webhook).
    WaitForEvent,
}

/// Returns the job that should be dispatched for a run currently at `step`,
/// or [`DispatchTarget::WaitForEvent`] for the two parked steps.
#[must_use]
pub fn dispatch_target_for_step(step: RunStep) -> DispatchTarget {
    match step {
        RunStep::SetupWorktree => DispatchTarget::RunJob("start"),
        RunStep::PlannerCreatePlan => DispatchTarget::AgentJob("planner.create_plan"),
        RunStep::ReviewerReviewPlan => DispatchTarget::AgentJob("reviewer.review_plan"),
        RunStep::WaitPlanApproval => DispatchTarget::WaitForEvent,
        RunStep::ImplementerApplyChanges => DispatchTarget::AgentJob("implementer.apply_changes"),
        RunStep::TesterRunTests => DispatchTarget::AgentJob("implementer.run_tests"),
        RunStep::ReviewerReviewCode => DispatchTarget::AgentJob("reviewer.review_code"),
        RunStep::CreatePr => DispatchTarget::RunJob("resume_pr_outbox"),
        RunStep::WaitPrMerge => DispatchTarget::WaitForEvent,
        RunStep::Cleanup => DispatchTarget::RunJob("cleanup"),
    }
}

// ============================================================================
// SECTION: Blocked-Retry Resolution
// ============================================================================

/// Resolves the phase a blocked run should retry into (§4.2
/// "Blocked-retry resolution", steps 1-2).
///
/// `context_prior_phase` is the `prior_phase` parsed from
/// `blocked_context_json`, if present and well-formed. `last_blocked_from`
/// is the `from` field of the last `phase.transitioned{to: blocked}` event
/// for this run, used as the fallback.
///
/// # Errors
/// Returns [`CoreError::NoRetryablePriorPhase`] if neither source names a
/// retryable phase.
pub fn resolve_blocked_retry_phase(
    run_id: &str,
    context_prior_phase: Option<RunPhase>,
    last_blocked_from: Option<RunPhase>,
) -> Result<RunPhase, CoreError> {
    if let Some(phase) = context_prior_phase {
        if phase.is_retryable_from_blocked() {
            return Ok(phase);
        }
    }
    if let Some(phase) = last_blocked_from {
        if phase.is_retryable_from_blocked() {
            return Ok(phase);
        }
    }
    Err(CoreError::NoRetryablePriorPhase { run_id: run_id.to_string() })
}

// ============================================================================
// SECTION: Episode Guard
// ============================================================================

/// Checks the episode guard described in §4.2 "Episode guard": a job
/// carrying `from_sequence` is stale if the run has since processed any
/// later event.
#[must_use]
pub fn is_stale_episode(job_from_sequence: i64, run_last_event_sequence: i64) -> bool {
    job_from_sequence != run_last_event_sequence
}

#[cfg(test)]
mod tests {
    use super::DispatchTarget;
    use super::dispatch_target_for_step;
    use super::is_allowed_transition;
    use super::is_stale_episode;
    use super::resolve_blocked_retry_phase;
    use super::validate_transition;
    use crate::errors::ErrorKind;
    use crate::run::RunPhase;
    use crate::run::RunStep;

    #[test]
    fn pending_to_planning_is_allowed_but_not_reverse() {
        assert!(is_allowed_transition(RunPhase::Pending, RunPhase::Planning));
        assert!(!is_allowed_transition(RunPhase::Planning, RunPhase::Pending));
    }

    #[test]
    fn terminal_phases_have_no_outgoing_edges() {
        for phase in [
            RunPhase::Pending,
            RunPhase::Planning,
            RunPhase::AwaitingPlanApproval,
            RunPhase::Executing,
            RunPhase::AwaitingReview,
            RunPhase::Blocked,
            RunPhase::Completed,
            RunPhase::Cancelled,
        ] {
            assert!(!is_allowed_transition(RunPhase::Completed, phase));
            assert!(!is_allowed_transition(RunPhase::Cancelled, phase));
        }
    }

    #[test]
    fn cas_mismatch_yields_stale_transition_not_illegal_transition() {
        let err = validate_transition(RunPhase::Blocked, RunPhase::Planning, RunPhase::AwaitingPlanApproval)
            .expect_err("current does not match from");
        assert_eq!(err.kind(), ErrorKind::StaleTransition);
    }

    #[test]
    fn illegal_edge_is_rejected_even_with_matching_cas() {
        let err = validate_transition(RunPhase::Pending, RunPhase::Pending, RunPhase::Completed)
            .expect_err("no such edge");
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn dispatch_routing_matches_parked_steps() {
        assert_eq!(dispatch_target_for_step(RunStep::WaitPlanApproval), DispatchTarget::WaitForEvent);
        assert_eq!(dispatch_target_for_step(RunStep::WaitPrMerge), DispatchTarget::WaitForEvent);
        assert_eq!(
            dispatch_target_for_step(RunStep::PlannerCreatePlan),
            DispatchTarget::AgentJob("planner.create_plan")
        );
    }

    #[test]
    fn blocked_retry_prefers_context_then_falls_back() {
        let resolved = resolve_blocked_retry_phase("run_1", Some(RunPhase::Executing), None)
            .expect("executing is retryable");
        assert_eq!(resolved, RunPhase::Executing);

        let fallback = resolve_blocked_retry_phase("run_1", None, Some(RunPhase::Planning))
            .expect("planning is retryable");
        assert_eq!(fallback, RunPhase::Planning);
    }

    #[test]
    fn blocked_retry_errors_when_neither_source_is_retryable() {
        let err = resolve_blocked_retry_phase("run_1", Some(RunPhase::Pending), Some(RunPhase::Blocked))
            .expect_err("neither pending nor blocked are retryable");
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn episode_guard_flags_mismatch_as_stale() {
        assert!(is_stale_episode(17, 25));
        assert!(!is_stale_episode(25, 25));
    }
}
