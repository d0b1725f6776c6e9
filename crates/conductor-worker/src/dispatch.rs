// conductor-worker/src/dispatch.rs
// ============================================================================
// Module: Dispatch Routing
// Description: Turns a run's current `(phase, step)` into the job enqueued
//              on the correct queue, carrying the episode guard (§4.5
//              "Dispatch routing", §4.2 "Episode guard").
// Purpose: The one place that translates a projection mutation into queue
//          work, so the drain loop and the operator-action path never
//          duplicate this logic.
// Dependencies: conductor-core
// ============================================================================

use conductor_core::hashing::deterministic_key;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::JobId;
use conductor_core::job::Job;
use conductor_core::job::JobStatus;
use conductor_core::job::Queue;
use conductor_core::run::Run;
use conductor_core::run::RunStep;
use conductor_core::state_machine::DispatchTarget;
use conductor_core::state_machine::dispatch_target_for_step;
use conductor_core::time::Timestamp;
use serde_json::json;
use ulid::Ulid;

use crate::context::ConductorContext;
use crate::errors::WorkerError;

/// Wire name for a [`RunStep`], matching its `snake_case` serde rename.
fn step_name(step: RunStep) -> String {
    serde_json::to_value(step).ok().and_then(|value| value.as_str().map(str::to_string)).unwrap_or_default()
}

/// Enqueues the job implied by `run`'s current step, if any (§4.5 "Dispatch
/// routing"). A no-op for the two parked steps (`wait_plan_approval`,
/// `wait_pr_merge`), which wait for an operator action or webhook fact
/// instead. Idempotent: re-dispatching the same `(run_id, step,
/// last_event_sequence)` collapses to the existing job row.
///
/// # Errors
/// Returns [`WorkerError::JobStore`] on storage failure.
pub fn enqueue_next_job(ctx: &ConductorContext, run: &Run) -> Result<Option<Job>, WorkerError> {
    let target = dispatch_target_for_step(run.step);
    let (queue, job_type) = match target {
        DispatchTarget::RunJob(name) => (Queue::Run, name),
        DispatchTarget::AgentJob(name) => (Queue::Agent, name),
        DispatchTarget::WaitForEvent => return Ok(None),
    };

    let idempotency_key = IdempotencyKey::new(deterministic_key(&[
        "dispatch",
        run.run_id.as_str(),
        &step_name(run.step),
        &run.last_event_sequence.to_string(),
    ]));

    let job = Job {
        job_id: JobId::new(Ulid::new().to_string()),
        queue,
        job_type: job_type.to_string(),
        payload: json!({
            "run_id": run.run_id.as_str(),
            "step": step_name(run.step),
            "from_sequence": run.last_event_sequence,
        }),
        idempotency_key,
        status: JobStatus::Queued,
        priority: 0,
        claimed_by: None,
        claimed_at: None,
        lease_expires_at: None,
        attempts: 0,
        max_attempts: max_attempts_for(queue, ctx),
        last_error: None,
        next_retry_at: None,
        created_at: Timestamp::now(),
    };
    Ok(Some(ctx.jobs.enqueue(job)?))
}

fn max_attempts_for(queue: Queue, ctx: &ConductorContext) -> u32 {
    match queue {
        Queue::Run => ctx.config.queues.run.max_attempts,
        Queue::Agent => ctx.config.queues.agent.max_attempts,
        Queue::Outbox => ctx.config.queues.outbox.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::step_name;
    use conductor_core::run::RunStep;

    #[test]
    fn step_name_matches_wire_form() {
        assert_eq!(step_name(RunStep::PlannerCreatePlan), "planner_create_plan");
        assert_eq!(step_name(RunStep::WaitPrMerge), "wait_pr_merge");
    }
}
