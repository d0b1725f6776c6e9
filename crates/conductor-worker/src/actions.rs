// conductor-worker/src/actions.rs
// ============================================================================
// Module: Operator Action Handler
// Description: The single in-process entry point both the HTTP control
//              surface and `conductor-cli` call to mutate a run (§6.3
//              Operator Control Surface).
// Purpose: Give CAS validation, decision-event construction, and checkpoint
//          resolution exactly one call path so the HTTP API and the CLI
//          can never drift apart.
// Dependencies: conductor-core
// ============================================================================

//! ## Overview
//! Every operator action resolves to a `(from_phase, to_phase, next_step)`
//! triple, validated through [`conductor_core::state_machine::validate_transition`]
//! and committed through [`conductor_core::interfaces::RunStore::transition_phase`]'s
//! optimistic-lock CAS. The action also appends the `phase.transitioned`
//! decision event that makes the mutation auditable, keyed by
//! [`conductor_core::event::idempotency::operator_action`] so a retried
//! click with the same `client_nonce` never double-applies. Once committed,
//! the run's wake handle is notified so the drain loop picks up the new
//! step without waiting for the janitor's sweep.

use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::event::idempotency::operator_action;
use conductor_core::ids::EventId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::RunId;
use conductor_core::interfaces::PolicyStoreError;
use conductor_core::policy::Override;
use conductor_core::run::CheckpointKind;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;
use conductor_core::state_machine::resolve_blocked_retry_phase;
use conductor_core::state_machine::validate_transition;
use conductor_core::time::Timestamp;
use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::context::ConductorContext;
use crate::errors::WorkerError;

/// The ten operator actions named in §6.3's action table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    /// Dispatches a pending run into planning.
    StartRun,
    /// Accepts the plan and moves the run into execution.
    ApprovePlan,
    /// Sends a run back to planning for another pass.
    RevisePlan,
    /// Rejects the plan and cancels the run.
    RejectAndCancel,
    /// Resumes a blocked run from its most recent valid checkpoint.
    Retry,
    /// Cancels a non-terminal run outright.
    Cancel,
    /// Pauses a healthy run without changing its phase.
    Pause,
    /// Resumes a paused run.
    Resume,
    /// Grants a policy override and retries a policy-blocked run.
    GrantPolicyException,
    /// Denies a policy exception request and cancels the run.
    DenyPolicyException,
}

impl OperatorAction {
    /// Parses the wire/CLI action name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "start_run" => Self::StartRun,
            "approve_plan" => Self::ApprovePlan,
            "revise_plan" => Self::RevisePlan,
            "reject_and_cancel" => Self::RejectAndCancel,
            "retry" => Self::Retry,
            "cancel" => Self::Cancel,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "grant_policy_exception" => Self::GrantPolicyException,
            "deny_policy_exception" => Self::DenyPolicyException,
            _ => return None,
        })
    }

    /// Returns the wire/CLI action name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartRun => "start_run",
            Self::ApprovePlan => "approve_plan",
            Self::RevisePlan => "revise_plan",
            Self::RejectAndCancel => "reject_and_cancel",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::GrantPolicyException => "grant_policy_exception",
            Self::DenyPolicyException => "deny_policy_exception",
        }
    }
}

/// One operator action request, stamped with the acting identity and the
/// idempotency nonce the caller supplies (§4.1 "`ui_action`" key recipe).
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// The run the action targets.
    pub run_id: RunId,
    /// Which action to perform.
    pub action: OperatorAction,
    /// The acting user's id, for the idempotency key and the event payload.
    pub actor_user_id: String,
    /// The acting user's display name, stamped into the event payload.
    pub actor_display_name: String,
    /// Optional free-text comment attached to the action.
    pub comment: Option<String>,
    /// Caller-supplied nonce; retried clicks reuse the same value.
    pub client_nonce: String,
    /// For `grant_policy_exception`, the override to record. Ignored by
    /// every other action.
    pub override_grant: Option<Override>,
}

/// Executes one operator action against `ctx`, returning the run's state
/// after the mutation commits.
///
/// # Errors
/// Returns [`WorkerError::RunNotFound`] if the run does not exist,
/// [`WorkerError::ActionNotPermitted`] if the action does not apply to the
/// run's current phase, or a store error if the CAS or event append fails.
pub fn execute_action(ctx: &ConductorContext, request: ActionRequest) -> Result<Run, WorkerError> {
    let run = ctx.runs.get(&request.run_id)?.ok_or_else(|| WorkerError::RunNotFound(request.run_id.clone()))?;

    if matches!(request.action, OperatorAction::Pause | OperatorAction::Resume) {
        return apply_pause(ctx, run, request);
    }

    let outcome = plan_outcome(ctx, &run, request.action)?;

    let idempotency_key = IdempotencyKey::new(operator_action(
        &request.actor_user_id,
        request.run_id.as_str(),
        request.action.as_str(),
        &request.client_nonce,
    ));

    let mut updated = run.clone();
    updated.phase = outcome.to_phase;
    updated.step = outcome.next_step;
    updated.updated_at = Timestamp::now();
    if outcome.to_phase.is_terminal() {
        updated.result = Some(outcome.result.unwrap_or(conductor_core::run::RunResult::Cancelled));
        updated.result_reason = request.comment.clone();
    }
    if outcome.to_phase != RunPhase::Blocked {
        updated.blocked_context = None;
    }

    if let Some(grant) = request.override_grant.clone() {
        if request.action == OperatorAction::GrantPolicyException {
            record_override(ctx, grant)?;
        }
    }

    let payload = json!({
        "action": request.action.as_str(),
        "actor_user_id": request.actor_user_id,
        "actor_display_name": request.actor_display_name,
        "comment": request.comment,
        "from_phase": run.phase,
        "to_phase": outcome.to_phase,
    });

    let event = Event {
        event_id: EventId::new(Ulid::new().to_string()),
        project_id: run.project_id.clone(),
        run_id: Some(run.run_id.clone()),
        task_id: Some(run.task_id.clone()),
        repo_id: Some(run.repo_id.clone()),
        event_type: "operator.action".to_string(),
        class: EventClass::Decision,
        payload,
        sequence: Some(run.next_sequence),
        idempotency_key,
        causation_id: None,
        correlation_id: None,
        txn_id: None,
        source: EventSource::UiAction,
        created_at: Timestamp::now(),
        processed_at: None,
    };
    ctx.events.append_event(event)?;

    let committed = ctx.runs.transition_phase(&request.run_id, run.phase, updated)?;
    ctx.wake.wake(&request.run_id);
    info!(
        run_id = %request.run_id,
        action = request.action.as_str(),
        from_phase = ?run.phase,
        to_phase = ?committed.phase,
        "operator action applied"
    );
    Ok(committed)
}

/// Applies `Pause`/`Resume`, the two actions that toggle `paused_at` rather
/// than move the run through the phase/step graph (§4.1 "`paused` is
/// orthogonal to `phase`"). Committed through [`RunStore::set_paused`]
/// rather than the CAS-guarded `transition_phase` path, since phase and
/// step are unchanged.
fn apply_pause(ctx: &ConductorContext, run: Run, request: ActionRequest) -> Result<Run, WorkerError> {
    if run.phase.is_terminal() {
        return Err(WorkerError::ActionNotPermitted {
            action: request.action.as_str().to_string(),
            phase: format!("{:?}", run.phase),
        });
    }

    let paused_by = (request.action == OperatorAction::Pause).then(|| request.actor_user_id.clone());

    let idempotency_key = IdempotencyKey::new(operator_action(
        &request.actor_user_id,
        request.run_id.as_str(),
        request.action.as_str(),
        &request.client_nonce,
    ));
    let event = Event {
        event_id: EventId::new(Ulid::new().to_string()),
        project_id: run.project_id.clone(),
        run_id: Some(run.run_id.clone()),
        task_id: Some(run.task_id.clone()),
        repo_id: Some(run.repo_id.clone()),
        event_type: "operator.action".to_string(),
        class: EventClass::Decision,
        payload: json!({
            "action": request.action.as_str(),
            "actor_user_id": request.actor_user_id,
            "actor_display_name": request.actor_display_name,
            "comment": request.comment,
        }),
        sequence: Some(run.next_sequence),
        idempotency_key,
        causation_id: None,
        correlation_id: None,
        txn_id: None,
        source: EventSource::UiAction,
        created_at: Timestamp::now(),
        processed_at: None,
    };
    ctx.events.append_event(event)?;

    let committed = ctx.runs.set_paused(&request.run_id, paused_by)?;
    ctx.wake.wake(&request.run_id);
    info!(run_id = %request.run_id, action = request.action.as_str(), "operator action applied");
    Ok(committed)
}

/// What one action resolves to, before the event/CAS are committed.
struct ActionOutcome {
    /// The run's phase after the action.
    to_phase: RunPhase,
    /// The run's step after the action.
    next_step: RunStep,
    /// Terminal outcome, if `to_phase` is terminal.
    result: Option<conductor_core::run::RunResult>,
}

/// Resolves `action` against `run`'s current phase into the phase/step/result
/// triple the caller should commit, or [`WorkerError::ActionNotPermitted`] if
/// the action does not apply here.
fn plan_outcome(ctx: &ConductorContext, run: &Run, action: OperatorAction) -> Result<ActionOutcome, WorkerError> {
    use conductor_core::run::RunResult;

    let not_permitted = || WorkerError::ActionNotPermitted {
        action: action.as_str().to_string(),
        phase: format!("{:?}", run.phase),
    };

    match action {
        OperatorAction::StartRun => {
            validate_transition(run.phase, RunPhase::Pending, RunPhase::Planning).map_err(|_| not_permitted())?;
            Ok(ActionOutcome { to_phase: RunPhase::Planning, next_step: RunStep::SetupWorktree, result: None })
        }
        OperatorAction::ApprovePlan => {
            validate_transition(run.phase, RunPhase::AwaitingPlanApproval, RunPhase::Executing)
                .map_err(|_| not_permitted())?;
            Ok(ActionOutcome {
                to_phase: RunPhase::Executing,
                next_step: RunStep::ImplementerApplyChanges,
                result: None,
            })
        }
        OperatorAction::RevisePlan => {
            validate_transition(run.phase, RunPhase::AwaitingPlanApproval, RunPhase::Planning)
                .map_err(|_| not_permitted())?;
            Ok(ActionOutcome { to_phase: RunPhase::Planning, next_step: RunStep::PlannerCreatePlan, result: None })
        }
        OperatorAction::RejectAndCancel => {
            validate_transition(run.phase, RunPhase::AwaitingPlanApproval, RunPhase::Cancelled)
                .map_err(|_| not_permitted())?;
            Ok(ActionOutcome {
                to_phase: RunPhase::Cancelled,
                next_step: run.step,
                result: Some(RunResult::Cancelled),
            })
        }
        OperatorAction::Retry => {
            if run.phase != RunPhase::Blocked {
                return Err(not_permitted());
            }
            let context_prior_phase = run.blocked_context.as_ref().and_then(|context| context.prior_phase);
            let last_blocked_from = last_blocked_from_event(ctx, run)?;
            let target = resolve_blocked_retry_phase(run.run_id.as_str(), context_prior_phase, last_blocked_from)
                .map_err(WorkerError::Core)?;
            validate_transition(run.phase, RunPhase::Blocked, target).map_err(|_| not_permitted())?;
            Ok(ActionOutcome { to_phase: target, next_step: entry_step_for_phase(target, run), result: None })
        }
        OperatorAction::Cancel => {
            if run.phase.is_terminal() {
                return Err(not_permitted());
            }
            validate_transition(run.phase, run.phase, RunPhase::Cancelled).map_err(|_| not_permitted())?;
            Ok(ActionOutcome {
                to_phase: RunPhase::Cancelled,
                next_step: run.step,
                result: Some(RunResult::Cancelled),
            })
        }
        OperatorAction::Pause | OperatorAction::Resume => {
            if run.phase.is_terminal() {
                return Err(not_permitted());
            }
            Ok(ActionOutcome { to_phase: run.phase, next_step: run.step, result: None })
        }
        OperatorAction::GrantPolicyException => {
            if run.phase != RunPhase::Blocked {
                return Err(not_permitted());
            }
            let context_prior_phase = run.blocked_context.as_ref().and_then(|context| context.prior_phase);
            let last_blocked_from = last_blocked_from_event(ctx, run)?;
            let target = resolve_blocked_retry_phase(run.run_id.as_str(), context_prior_phase, last_blocked_from)
                .map_err(WorkerError::Core)?;
            validate_transition(run.phase, RunPhase::Blocked, target).map_err(|_| not_permitted())?;
            Ok(ActionOutcome { to_phase: target, next_step: entry_step_for_phase(target, run), result: None })
        }
        OperatorAction::DenyPolicyException => {
            validate_transition(run.phase, RunPhase::Blocked, RunPhase::Cancelled).map_err(|_| not_permitted())?;
            Ok(ActionOutcome {
                to_phase: RunPhase::Cancelled,
                next_step: run.step,
                result: Some(RunResult::Cancelled),
            })
        }
    }
}

/// Picks the step to resume into for `phase`, skipping past whatever the
/// run's most recent valid checkpoint already covers (§4.2 "Retry from
/// `blocked` resumes from the most recent valid checkpoint").
fn entry_step_for_phase(phase: RunPhase, run: &Run) -> RunStep {
    let has_valid = |kind: CheckpointKind| {
        run.checkpoints.iter().rev().any(|checkpoint| checkpoint.kind == kind && checkpoint.is_valid(run.head_sha.as_deref()))
    };

    match phase {
        RunPhase::Planning => {
            if has_valid(CheckpointKind::EnvironmentReady) {
                RunStep::PlannerCreatePlan
            } else {
                RunStep::SetupWorktree
            }
        }
        RunPhase::Executing => {
            if has_valid(CheckpointKind::TestsPassed) {
                RunStep::ReviewerReviewCode
            } else if has_valid(CheckpointKind::ImplementationComplete) {
                RunStep::TesterRunTests
            } else {
                RunStep::ImplementerApplyChanges
            }
        }
        RunPhase::AwaitingReview => {
            if has_valid(CheckpointKind::PrCreated) {
                RunStep::WaitPrMerge
            } else {
                RunStep::CreatePr
            }
        }
        _ => run.step,
    }
}

/// Resolves the §4.2 "Blocked-retry resolution" step-2 fallback: the last
/// `phase.transitioned` decision event for this run whose `to_phase` is
/// `blocked`, returning its `from_phase`. Used when `blocked_context_json`'s
/// `prior_phase` is missing or not itself retryable.
fn last_blocked_from_event(ctx: &ConductorContext, run: &Run) -> Result<Option<RunPhase>, WorkerError> {
    let decisions = ctx.events.decision_events_for_run(&run.run_id)?;
    let from_phase = decisions
        .iter()
        .rev()
        .filter(|event| event.event_type == "phase.transitioned")
        .find_map(|event| {
            let to_phase = event.payload.get("to_phase")?;
            if serde_json::from_value::<RunPhase>(to_phase.clone()).ok()? != RunPhase::Blocked {
                return None;
            }
            let from_phase = event.payload.get("from_phase")?;
            serde_json::from_value::<RunPhase>(from_phase.clone()).ok()
        });
    Ok(from_phase)
}

/// Records a granted policy override, mapping the store's `Io` error
/// through [`WorkerError`].
fn record_override(ctx: &ConductorContext, grant: Override) -> Result<(), WorkerError> {
    ctx.policies.record_override(grant).map(|_| ()).map_err(|err: PolicyStoreError| err.into())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use conductor_config::ConductorConfig;
    use conductor_core::event::Event;
    use conductor_core::event::EventClass;
    use conductor_core::event::EventSource;
    use conductor_core::ids::EventId;
    use conductor_core::ids::IdempotencyKey;
    use conductor_core::ids::ProjectId;
    use conductor_core::ids::RepoId;
    use conductor_core::ids::RunId;
    use conductor_core::ids::TaskId;
    use conductor_core::run::IterationCounters;
    use conductor_core::run::Run;
    use conductor_core::run::RunPhase;
    use conductor_core::run::RunStep;
    use conductor_core::time::Timestamp;
    use conductor_providers::FakeGitHubClient;
    use conductor_providers::GitHubClient;
    use conductor_providers::StaticCredentialProvider;
    use conductor_store_sqlite::SqliteStore;
    use conductor_store_sqlite::SqliteStoreConfig;
    use serde_json::json;
    use ulid::Ulid;

    use super::ActionRequest;
    use super::OperatorAction;
    use super::execute_action;
    use crate::context::ConductorContext;
    use crate::notify::RunWakeRegistry;

    fn test_ctx() -> (ConductorContext, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open in-memory store"));
        let credentials = Arc::new(StaticCredentialProvider::new(HashMap::new()));
        let ctx = ConductorContext {
            events: store.clone(),
            runs: store.clone(),
            gates: store.clone(),
            jobs: store.clone(),
            outbox: store.clone(),
            artifacts: store.clone(),
            policies: store.clone(),
            worktrees: store.clone(),
            credentials,
            github: Arc::new(FakeGitHubClient::new(Vec::new())) as Arc<dyn GitHubClient>,
            config: Arc::new(ConductorConfig::default()),
            wake: Arc::new(RunWakeRegistry::new()),
            worker_id: Arc::from("test-worker"),
        };
        (ctx, store)
    }

    fn blocked_run(run_id: &str) -> Run {
        let now = Timestamp::now();
        Run {
            run_id: RunId::new(run_id),
            task_id: TaskId::new("task_1"),
            project_id: ProjectId::new("proj_1"),
            repo_id: RepoId::new("repo_1"),
            run_number: 1,
            parent_run_id: None,
            supersedes_run_id: None,
            phase: RunPhase::Blocked,
            step: RunStep::ImplementerApplyChanges,
            next_sequence: 2,
            last_event_sequence: 1,
            paused_at: None,
            paused_by: None,
            blocked_context: None,
            base_branch: "main".into(),
            branch: None,
            head_sha: None,
            pr_bundle: None,
            iterations: IterationCounters::default(),
            result: None,
            result_reason: None,
            checkpoints: Vec::new(),
            artifact_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// §4.2 "Blocked-retry resolution", step 2: when `blocked_context_json`
    /// carries no `prior_phase` (missing/invalid), retry must fall back to
    /// the last `phase.transitioned{to: blocked}` decision event's `from`.
    #[test]
    fn retry_falls_back_to_last_phase_transitioned_event_when_context_is_missing() {
        let (ctx, store) = test_ctx();
        let run = blocked_run("run_fallback");
        store.insert_run(&run).expect("insert run");

        let decision = Event {
            event_id: EventId::new(Ulid::new().to_string()),
            project_id: run.project_id.clone(),
            run_id: Some(run.run_id.clone()),
            task_id: Some(run.task_id.clone()),
            repo_id: Some(run.repo_id.clone()),
            event_type: "phase.transitioned".to_string(),
            class: EventClass::Decision,
            payload: json!({ "from_phase": "executing", "to_phase": "blocked" }),
            sequence: Some(1),
            idempotency_key: IdempotencyKey::new("fallback_decision_1"),
            causation_id: None,
            correlation_id: None,
            txn_id: None,
            source: EventSource::System,
            created_at: Timestamp::now(),
            processed_at: None,
        };
        ctx.events.append_event(decision).expect("seed decision event");

        let committed = execute_action(
            &ctx,
            ActionRequest {
                run_id: run.run_id.clone(),
                action: OperatorAction::Retry,
                actor_user_id: "operator_1".into(),
                actor_display_name: "Operator One".into(),
                comment: None,
                client_nonce: "nonce-1".into(),
                override_grant: None,
            },
        )
        .expect("retry resolves via fallback");

        assert_eq!(committed.phase, RunPhase::Executing);
        assert_eq!(committed.step, RunStep::ImplementerApplyChanges);
    }

    /// Without a usable `prior_phase` in context, and with no matching
    /// `phase.transitioned{to: blocked}` decision in the log, retry must be
    /// rejected rather than silently guessing a target phase.
    #[test]
    fn retry_fails_when_neither_context_nor_history_name_a_retryable_phase() {
        let (ctx, store) = test_ctx();
        let run = blocked_run("run_no_history");
        store.insert_run(&run).expect("insert run");

        let err = execute_action(
            &ctx,
            ActionRequest {
                run_id: run.run_id.clone(),
                action: OperatorAction::Retry,
                actor_user_id: "operator_1".into(),
                actor_display_name: "Operator One".into(),
                comment: None,
                client_nonce: "nonce-1".into(),
                override_grant: None,
            },
        )
        .expect_err("no retryable phase is resolvable");

        assert!(matches!(err, super::WorkerError::Core(_)));
    }
}
