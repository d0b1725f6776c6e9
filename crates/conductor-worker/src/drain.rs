// conductor-worker/src/drain.rs
// ============================================================================
// Module: Drain Loop
// Description: Interprets a run's next unprocessed event and commits the
//              resulting projection mutation (§4.2 Run Projection & State
//              Machine, §4.5 Drain Loop).
// Purpose: The only place a `fact`/`signal` event is turned into the
//          `phase.transitioned`/`step.advanced` decision that actually
//          moves a run forward; everything upstream (agent/run-job workers,
//          the webhook handler) only ever appends, never mutates.
// Dependencies: conductor-core
// ============================================================================

//! ## Overview
//! [`drain_run_once`] is the per-run cursor: it pulls the smallest-sequence
//! unprocessed event via [`conductor_core::interfaces::EventStore::next_unprocessed_event`]
//! and, depending on its class, either just re-dispatches (a `decision` was
//! already applied by whoever emitted it, typically [`crate::actions`]) or
//! interprets a `fact`/`signal` into a new decision. Callers loop this until
//! it returns `Ok(false)`, then wait on the run's [`crate::notify::RunWakeRegistry`]
//! handle.
//!
//! GitHub webhook facts are accepted without a `run_id` (§6.2): they cannot
//! reach a run's cursor directly. [`reconcile_webhook_facts`] is the
//! separate, run-unscoped sweep that correlates a `github.pull_request`
//! fact to the run parked in `wait_pr_merge` by PR number and re-emits it as
//! a run-scoped signal the per-run cursor can then pick up.

use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::event::idempotency::derived_decision;
use conductor_core::ids::CausationId;
use conductor_core::ids::EventId;
use conductor_core::ids::GateEvalId;
use conductor_core::ids::GateId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::RunId;
use conductor_core::gate::GateEvaluation;
use conductor_core::gate::GateStatus;
use conductor_core::run::BlockedContext;
use conductor_core::run::Checkpoint;
use conductor_core::run::CheckpointKind;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunResult;
use conductor_core::run::RunStep;
use conductor_core::state_machine::is_stale_episode;
use conductor_core::state_machine::validate_transition;
use conductor_core::time::Timestamp;
use serde_json::Value;
use serde_json::json;
use tracing::warn;
use ulid::Ulid;

use crate::context::ConductorContext;
use crate::dispatch;
use crate::errors::WorkerError;
use crate::progression;
use crate::progression::Advance;

// ============================================================================
// SECTION: Per-Run Cursor
// ============================================================================

/// Processes at most one unprocessed event for `run_id`. Returns `true` if
/// an event was found and processed, `false` if the run's cursor is
/// currently empty.
///
/// # Errors
/// Returns [`WorkerError`] for store failures or an illegal transition.
pub fn drain_run_once(ctx: &ConductorContext, run_id: &RunId) -> Result<bool, WorkerError> {
    let Some(event) = ctx.events.next_unprocessed_event(run_id)? else {
        return Ok(false);
    };

    match event.class {
        EventClass::Decision => {
            // Already applied by its emitter (an operator action or a prior
            // drain commit); the cursor's job here is just to dispatch the
            // job the resulting (phase, step) implies.
            ctx.events.mark_processed(&event.event_id, Timestamp::now())?;
            let run = ctx.runs.get(run_id)?.ok_or_else(|| WorkerError::RunNotFound(run_id.clone()))?;
            dispatch::enqueue_next_job(ctx, &run)?;
        }
        EventClass::Fact | EventClass::Signal => {
            interpret_signal(ctx, run_id, &event)?;
        }
    }
    Ok(true)
}

fn interpret_signal(ctx: &ConductorContext, run_id: &RunId, event: &Event) -> Result<(), WorkerError> {
    let run = ctx.runs.get(run_id)?.ok_or_else(|| WorkerError::RunNotFound(run_id.clone()))?;

    let from_sequence = event.payload.get("from_sequence").and_then(Value::as_i64).unwrap_or(run.last_event_sequence);
    if is_stale_episode(from_sequence, run.last_event_sequence) {
        warn!(run_id = %run_id, event_id = %event.event_id, "dropping stale episode signal");
        ctx.events.mark_processed(&event.event_id, Timestamp::now())?;
        return Ok(());
    }

    match event.event_type.as_str() {
        "run.job_succeeded" => apply_job_succeeded(ctx, run, event)?,
        "run.job_failed" => apply_job_failed(ctx, run, event)?,
        "webhook.pr_merged" => apply_pr_merged(ctx, run, event)?,
        "webhook.pr_closed" => apply_pr_closed(ctx, run, event)?,
        other => {
            warn!(run_id = %run_id, event_type = other, "drain loop: no interpretation for this event type");
        }
    }
    ctx.events.mark_processed(&event.event_id, Timestamp::now())?;
    Ok(())
}

// ============================================================================
// SECTION: Job Outcome Interpretation
// ============================================================================

fn apply_job_succeeded(ctx: &ConductorContext, run: Run, event: &Event) -> Result<(), WorkerError> {
    let tests_passed = event.payload.get("tests_passed").and_then(Value::as_bool);
    let advance = progression::advance_on_success(run.step, tests_passed);

    if run.step == RunStep::TesterRunTests {
        record_tests_gate(ctx, &run, event, tests_passed.unwrap_or(false))?;
    }

    commit_advance(ctx, run, event, advance)
}

fn apply_job_failed(ctx: &ConductorContext, run: Run, event: &Event) -> Result<(), WorkerError> {
    let reason = event.payload.get("reason").and_then(Value::as_str).unwrap_or("job failed").to_string();
    validate_transition(run.phase, run.phase, RunPhase::Blocked).map_err(WorkerError::Core)?;

    let mut updated = run.clone();
    updated.phase = RunPhase::Blocked;
    updated.blocked_context = Some(BlockedContext {
        reason,
        prior_phase: Some(run.phase),
        prior_step: Some(run.step),
        diagnostics: event.payload.clone(),
    });
    updated.last_event_sequence = event.sequence.unwrap_or(run.last_event_sequence);
    updated.updated_at = Timestamp::now();

    append_decision(ctx, &run, &updated, event, "phase.transitioned")?;
    ctx.runs.transition_phase(&run.run_id, run.phase, updated)?;
    ctx.wake.wake(&run.run_id);
    Ok(())
}

/// Commits an [`Advance`] resolved from a succeeded job, appending the
/// decision event, CAS-committing the projection, and re-dispatching the
/// next job in one pass.
fn commit_advance(ctx: &ConductorContext, run: Run, event: &Event, advance: Advance) -> Result<(), WorkerError> {
    let to_phase = advance.phase.unwrap_or(run.phase);
    if advance.phase.is_some() {
        validate_transition(run.phase, run.phase, to_phase).map_err(WorkerError::Core)?;
    }

    let mut updated = run.clone();
    updated.phase = to_phase;
    updated.step = advance.step;
    updated.last_event_sequence = event.sequence.unwrap_or(run.last_event_sequence);
    updated.updated_at = Timestamp::now();

    if let Some(kind) = advance.checkpoint {
        updated.checkpoints.push(Checkpoint {
            kind,
            evidence: event.payload.clone(),
            anchor: checkpoint_anchor(kind, &updated),
            recorded_at: Timestamp::now(),
        });
    }

    let decision_type = if advance.phase.is_some() { "phase.transitioned" } else { "step.advanced" };
    append_decision(ctx, &run, &updated, event, decision_type)?;
    let committed = ctx.runs.transition_phase(&run.run_id, run.phase, updated)?;
    ctx.wake.wake(&run.run_id);
    dispatch::enqueue_next_job(ctx, &committed)?;
    Ok(())
}

/// Resolves the anchor value a freshly-recorded checkpoint should capture
/// (§4.2 "Checkpoints"): `environment_ready`/`planning_complete`/
/// `plan_approved` carry no anchor; the rest anchor to `head_sha`.
fn checkpoint_anchor(kind: CheckpointKind, run: &Run) -> Option<String> {
    match kind {
        CheckpointKind::ImplementationComplete | CheckpointKind::TestsPassed | CheckpointKind::PrCreated => {
            run.head_sha.clone()
        }
        CheckpointKind::EnvironmentReady | CheckpointKind::PlanningComplete | CheckpointKind::PlanApproved => None,
    }
}

fn record_tests_gate(ctx: &ConductorContext, run: &Run, event: &Event, tests_passed: bool) -> Result<(), WorkerError> {
    let evaluation = GateEvaluation {
        gate_evaluation_id: GateEvalId::new(Ulid::new().to_string()),
        run_id: run.run_id.clone(),
        gate_id: GateId::new("tests"),
        status: if tests_passed { GateStatus::Passed } else { GateStatus::Failed },
        causation_event_sequence: event.sequence.unwrap_or(run.last_event_sequence),
        details: event.payload.clone(),
        evaluated_at: Timestamp::now(),
    };
    ctx.gates.record_evaluation(evaluation)?;
    Ok(())
}

// ============================================================================
// SECTION: Webhook Fact Correlation
// ============================================================================

/// Scans every pending, run-unscoped fact event and correlates the
/// `github.pull_request` ones to the run awaiting their outcome, emitting a
/// run-scoped signal for each match (§6.2 "Wire Boundary"). Returns the
/// number of facts correlated to a run.
///
/// A fact for a PR Conductor never opened, or one arriving before its run
/// has reached `wait_pr_merge`, is simply left uncorrelated and marked
/// processed; there is nothing further this sweep can do with it.
///
/// # Errors
/// Returns [`WorkerError`] for store failures.
pub fn reconcile_webhook_facts(ctx: &ConductorContext) -> Result<u64, WorkerError> {
    let facts = ctx.events.pending_fact_events()?;
    let mut correlated = 0u64;
    for fact in facts {
        if fact.event_type == "github.pull_request" && correlate_pull_request_fact(ctx, &fact)? {
            correlated += 1;
        }
        ctx.events.mark_processed(&fact.event_id, Timestamp::now())?;
    }
    Ok(correlated)
}

fn correlate_pull_request_fact(ctx: &ConductorContext, fact: &Event) -> Result<bool, WorkerError> {
    let action = fact.payload.get("action").and_then(Value::as_str).unwrap_or("");
    if action != "closed" {
        return Ok(false);
    }
    let Some(pr_number) = fact.payload.get("number").and_then(Value::as_i64) else {
        return Ok(false);
    };
    let merged = fact.payload.get("pull_request").and_then(|pr| pr.get("merged")).and_then(Value::as_bool).unwrap_or(false);

    let Some(run) = ctx.runs.find_by_pr_number(pr_number)? else {
        return Ok(false);
    };
    if run.step != RunStep::WaitPrMerge {
        return Ok(false);
    }

    let event_type = if merged { "webhook.pr_merged" } else { "webhook.pr_closed" };
    let idempotency_key = IdempotencyKey::new(derived_decision(fact.event_id.as_str(), event_type));
    let signal = Event {
        event_id: EventId::new(Ulid::new().to_string()),
        project_id: run.project_id.clone(),
        run_id: Some(run.run_id.clone()),
        task_id: Some(run.task_id.clone()),
        repo_id: Some(run.repo_id.clone()),
        event_type: event_type.to_string(),
        class: EventClass::Signal,
        payload: json!({
            "run_id": run.run_id.as_str(),
            "from_sequence": run.last_event_sequence,
            "pr_number": pr_number,
        }),
        sequence: Some(run.next_sequence),
        idempotency_key,
        causation_id: Some(CausationId::new(fact.event_id.as_str())),
        correlation_id: None,
        txn_id: None,
        source: EventSource::System,
        created_at: Timestamp::now(),
        processed_at: None,
    };
    ctx.events.append_event(signal)?;
    ctx.wake.wake(&run.run_id);
    Ok(true)
}

fn apply_pr_merged(ctx: &ConductorContext, run: Run, event: &Event) -> Result<(), WorkerError> {
    validate_transition(run.phase, run.phase, RunPhase::Completed).map_err(WorkerError::Core)?;

    let mut updated = run.clone();
    updated.phase = RunPhase::Completed;
    updated.step = RunStep::Cleanup;
    updated.result = Some(RunResult::Success);
    updated.last_event_sequence = event.sequence.unwrap_or(run.last_event_sequence);
    updated.updated_at = Timestamp::now();

    append_decision(ctx, &run, &updated, event, "phase.transitioned")?;
    let committed = ctx.runs.transition_phase(&run.run_id, run.phase, updated)?;
    ctx.wake.wake(&run.run_id);
    dispatch::enqueue_next_job(ctx, &committed)?;
    Ok(())
}

fn apply_pr_closed(ctx: &ConductorContext, run: Run, event: &Event) -> Result<(), WorkerError> {
    validate_transition(run.phase, run.phase, RunPhase::Blocked).map_err(WorkerError::Core)?;

    let mut updated = run.clone();
    updated.phase = RunPhase::Blocked;
    updated.blocked_context = Some(BlockedContext {
        reason: "pull request was closed without merging".to_string(),
        prior_phase: Some(run.phase),
        prior_step: Some(run.step),
        diagnostics: event.payload.clone(),
    });
    updated.last_event_sequence = event.sequence.unwrap_or(run.last_event_sequence);
    updated.updated_at = Timestamp::now();

    append_decision(ctx, &run, &updated, event, "phase.transitioned")?;
    ctx.runs.transition_phase(&run.run_id, run.phase, updated)?;
    ctx.wake.wake(&run.run_id);
    Ok(())
}

// ============================================================================
// SECTION: Decision Append Helper
// ============================================================================

/// Appends the `phase.transitioned`/`step.advanced` decision event that
/// makes a projection mutation auditable, keyed to the causing event so a
/// re-processed drain tick never double-emits (§4.1 "Idempotency key rule").
fn append_decision(ctx: &ConductorContext, before: &Run, after: &Run, causing: &Event, decision_type: &str) -> Result<(), WorkerError> {
    let idempotency_key = IdempotencyKey::new(derived_decision(causing.event_id.as_str(), decision_type));
    let payload = json!({
        "from_phase": before.phase,
        "to_phase": after.phase,
        "from_step": before.step,
        "to_step": after.step,
        "causation_event_id": causing.event_id.as_str(),
    });
    let event = Event {
        event_id: EventId::new(Ulid::new().to_string()),
        project_id: before.project_id.clone(),
        run_id: Some(before.run_id.clone()),
        task_id: Some(before.task_id.clone()),
        repo_id: Some(before.repo_id.clone()),
        event_type: decision_type.to_string(),
        class: EventClass::Decision,
        payload,
        sequence: Some(before.next_sequence),
        idempotency_key,
        causation_id: Some(CausationId::new(causing.event_id.as_str())),
        correlation_id: None,
        txn_id: None,
        source: EventSource::System,
        created_at: Timestamp::now(),
        processed_at: None,
    };
    ctx.events.append_event(event)?;
    Ok(())
}
