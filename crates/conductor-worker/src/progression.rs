// conductor-worker/src/progression.rs
// ============================================================================
// Module: Run Progression
// Description: Maps a finished job's outcome at a given `(phase, step)` to
//              the run's next phase/step and the checkpoint it reaches
//              (§4.2 Checkpoints, §4.5 Dispatch routing).
// Purpose: One pure function the drain loop consults when it interprets a
//          `run.job_succeeded` / `run.job_failed` signal, so the phase
//          graph and the checkpoint table never drift apart.
// Dependencies: conductor-core
// ============================================================================

use conductor_core::run::CheckpointKind;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;

/// What a successful job completion at `(phase, step)` advances the run to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// The run's next phase. `None` means the phase is unchanged.
    pub phase: Option<RunPhase>,
    /// The run's next step.
    pub step: RunStep,
    /// The checkpoint this completion evidences, if any.
    pub checkpoint: Option<CheckpointKind>,
}

impl Advance {
    const fn same_phase(step: RunStep, checkpoint: Option<CheckpointKind>) -> Self {
        Self { phase: None, step, checkpoint }
    }

    const fn new_phase(phase: RunPhase, step: RunStep, checkpoint: Option<CheckpointKind>) -> Self {
        Self { phase: Some(phase), step, checkpoint }
    }
}

/// Resolves the run's next `(phase, step)` and reached checkpoint after a
/// job for `step` completes successfully.
///
/// `tests_passed` distinguishes a passing vs failing `tester_run_tests`
/// run: `None` for every other step.
#[must_use]
pub fn advance_on_success(step: RunStep, tests_passed: Option<bool>) -> Advance {
    match step {
        RunStep::SetupWorktree => Advance::same_phase(RunStep::PlannerCreatePlan, Some(CheckpointKind::EnvironmentReady)),
        RunStep::PlannerCreatePlan => {
            Advance::same_phase(RunStep::ReviewerReviewPlan, Some(CheckpointKind::PlanningComplete))
        }
        RunStep::ReviewerReviewPlan => {
            Advance::new_phase(RunPhase::AwaitingPlanApproval, RunStep::WaitPlanApproval, None)
        }
        RunStep::ImplementerApplyChanges => {
            Advance::same_phase(RunStep::TesterRunTests, Some(CheckpointKind::ImplementationComplete))
        }
        RunStep::TesterRunTests => {
            if tests_passed.unwrap_or(false) {
                Advance::same_phase(RunStep::ReviewerReviewCode, Some(CheckpointKind::TestsPassed))
            } else {
                Advance::same_phase(RunStep::ImplementerApplyChanges, None)
            }
        }
        RunStep::ReviewerReviewCode => Advance::new_phase(RunPhase::AwaitingReview, RunStep::CreatePr, None),
        RunStep::CreatePr => Advance::same_phase(RunStep::WaitPrMerge, Some(CheckpointKind::PrCreated)),
        RunStep::Cleanup => Advance::same_phase(RunStep::Cleanup, None),
        RunStep::WaitPlanApproval | RunStep::WaitPrMerge => Advance::same_phase(step, None),
    }
}
