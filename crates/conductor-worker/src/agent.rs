// conductor-worker/src/agent.rs
// ============================================================================
// Module: Agent Job Worker
// Description: Claims `Queue::Agent` jobs, invokes the configured
//              `AgentRuntime` under the run's sandbox, and reports the
//              outcome back onto the event log as a `signal` for the
//              drain loop to interpret (§2 "Agent Worker").
// Purpose: The boundary between Conductor's orchestration core and a
//          specific AI provider / prompting strategy, neither of which
//          this crate has an opinion on (§1 Non-goals).
// Dependencies: conductor-core, conductor-sandbox
// ============================================================================

//! ## Overview
//! [`AgentRuntime`] is Conductor's provider seam: planner/implementer/
//! reviewer/tester prompting, model selection, and tool-call loops live
//! behind it in a real deployment. This crate only defines the contract and
//! the job-claim loop that calls it; the orchestrator never talks to a
//! model directly. A failed or timed-out invocation is not a worker error —
//! it is folded into a `run.job_failed` fact the drain loop turns into an
//! `agent.failed` decision (§4.5 "Failure semantics").

use std::sync::Arc;

use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::event::idempotency::derived_decision;
use conductor_core::ids::EventId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::RunId;
use conductor_core::job::FailureDisposition;
use conductor_core::job::Job;
use conductor_core::job::Queue;
use conductor_core::run::RunStep;
use conductor_core::time::Timestamp;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::warn;
use ulid::Ulid;

use crate::context::ConductorContext;
use crate::errors::WorkerError;

// ============================================================================
// SECTION: Provider Seam
// ============================================================================

/// One agent invocation request, built from a claimed job's payload and the
/// run's current worktree (§4.7 "The agent-runtime calls a small set of
/// tools").
#[derive(Debug, Clone)]
pub struct AgentInvocationRequest {
    /// The run this invocation is acting on behalf of.
    pub run_id: RunId,
    /// Which step is being executed, selecting the role/prompt.
    pub step: RunStep,
    /// Absolute path of the run's worktree, the sandbox's confinement root.
    pub worktree_path: String,
    /// Per-role timeout, already resolved from [`conductor_config::AgentTimeouts`].
    pub timeout_seconds: u64,
}

/// What an invocation reports back.
#[derive(Debug, Clone)]
pub enum AgentInvocationOutcome {
    /// The agent finished its step. `tests_passed` is meaningful only for
    /// `tester_run_tests`; every other step leaves it `None`.
    Success {
        /// Structured output (PLAN content, review findings, test report),
        /// opaque to this worker.
        artifact: Option<Value>,
        /// Whether the test suite passed, for `tester_run_tests` only.
        tests_passed: Option<bool>,
    },
    /// The agent failed: provider error, timeout, or invalid output.
    Failure {
        /// Human-readable failure reason, folded into `blocked_context_json`.
        reason: String,
    },
}

/// Errors an [`AgentRuntime`] implementation may raise before it can even
/// produce a [`AgentInvocationOutcome`] (transport-level, not agent-level,
/// failure).
#[derive(Debug, Error)]
pub enum AgentRuntimeError {
    /// The underlying provider call failed (network, auth, rate limit).
    #[error("agent provider error: {0}")]
    Provider(String),
}

/// Conductor's provider seam (§1 "Non-goals: ... a specific AI provider").
/// A real deployment supplies an implementation that resolves a prompt for
/// `request.step`, runs a tool-call loop through `conductor-sandbox`, and
/// returns the structured outcome.
pub trait AgentRuntime: Send + Sync {
    /// Runs one agent invocation to completion or failure.
    ///
    /// # Errors
    /// Returns [`AgentRuntimeError`] only for transport-level failures that
    /// never reached a structured agent outcome; anything the agent itself
    /// reports as a failure is [`AgentInvocationOutcome::Failure`], not an
    /// `Err`.
    fn invoke(&self, request: &AgentInvocationRequest) -> Result<AgentInvocationOutcome, AgentRuntimeError>;
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Lease duration and worker identity for the agent queue.
#[derive(Debug, Clone, Copy)]
pub struct AgentWorkerConfig {
    /// Lease duration granted on each claim, in milliseconds.
    pub lease_ms: u64,
}

/// Claims and processes jobs on `Queue::Agent` (§2 "Agent Worker").
pub struct AgentJobWorker {
    ctx: ConductorContext,
    runtime: Arc<dyn AgentRuntime>,
    config: AgentWorkerConfig,
}

impl AgentJobWorker {
    /// Builds a worker over `ctx`'s backends, dispatching invocations to
    /// `runtime`.
    #[must_use]
    pub fn new(ctx: ConductorContext, runtime: Arc<dyn AgentRuntime>, config: AgentWorkerConfig) -> Self {
        Self { ctx, runtime, config }
    }

    /// Claims and processes at most one agent job. Returns `true` if a job
    /// was claimed, `false` if the queue was empty.
    ///
    /// # Errors
    /// Returns [`WorkerError`] for store or payload failures.
    pub fn claim_and_process_one(&self) -> Result<bool, WorkerError> {
        let Some(job) = self.ctx.jobs.claim(Queue::Agent, &self.ctx.worker_id, self.config.lease_ms)? else {
            return Ok(false);
        };

        match self.process(&job) {
            Ok(()) => {
                self.ctx.jobs.complete(&job.job_id, &self.ctx.worker_id)?;
            }
            Err(err) => {
                warn!(job_id = %job.job_id, error = %err, "agent job transport failure, will retry");
                self.ctx.jobs.fail(
                    &job.job_id,
                    &self.ctx.worker_id,
                    &err.to_string(),
                    FailureDisposition::RetryAfterMs(5_000),
                )?;
            }
        }
        Ok(true)
    }

    fn process(&self, job: &Job) -> Result<(), WorkerError> {
        let run_id = RunId::new(job.payload.get("run_id").and_then(Value::as_str).unwrap_or_default());
        let from_sequence = job.payload.get("from_sequence").and_then(Value::as_i64).unwrap_or(0);
        let run = self.ctx.runs.get(&run_id)?.ok_or_else(|| WorkerError::RunNotFound(run_id.clone()))?;

        let worktree = self.ctx.worktrees.active_for_run(&run_id)?;
        let request = AgentInvocationRequest {
            run_id: run_id.clone(),
            step: run.step,
            worktree_path: worktree.map(|w| w.path).unwrap_or_default(),
            timeout_seconds: timeout_for_step(run.step, &self.ctx),
        };

        let outcome = match self.runtime.invoke(&request) {
            Ok(outcome) => outcome,
            Err(err) => AgentInvocationOutcome::Failure { reason: err.to_string() },
        };

        let (event_type, payload) = match outcome {
            AgentInvocationOutcome::Success { artifact, tests_passed } => (
                "run.job_succeeded",
                json!({
                    "run_id": run_id.as_str(),
                    "step": job.payload.get("step").cloned().unwrap_or(Value::Null),
                    "from_sequence": from_sequence,
                    "tests_passed": tests_passed,
                    "artifact": artifact,
                }),
            ),
            AgentInvocationOutcome::Failure { reason } => (
                "run.job_failed",
                json!({
                    "run_id": run_id.as_str(),
                    "step": job.payload.get("step").cloned().unwrap_or(Value::Null),
                    "from_sequence": from_sequence,
                    "reason": reason,
                }),
            ),
        };

        let idempotency_key =
            IdempotencyKey::new(derived_decision(job.idempotency_key.as_str(), event_type));
        let event = Event {
            event_id: EventId::new(Ulid::new().to_string()),
            project_id: run.project_id.clone(),
            run_id: Some(run.run_id.clone()),
            task_id: Some(run.task_id.clone()),
            repo_id: Some(run.repo_id.clone()),
            event_type: event_type.to_string(),
            class: EventClass::Signal,
            payload,
            sequence: Some(run.next_sequence),
            idempotency_key,
            causation_id: None,
            correlation_id: None,
            txn_id: None,
            source: EventSource::AgentRuntime,
            created_at: Timestamp::now(),
            processed_at: None,
        };
        self.ctx.events.append_event(event)?;
        self.ctx.wake.wake(&run_id);
        Ok(())
    }
}

fn timeout_for_step(step: RunStep, ctx: &ConductorContext) -> u64 {
    let timeouts = &ctx.config.agent_timeouts;
    match step {
        RunStep::PlannerCreatePlan => timeouts.planner_seconds,
        RunStep::ImplementerApplyChanges => timeouts.implementer_seconds,
        RunStep::TesterRunTests => timeouts.tester_seconds,
        RunStep::ReviewerReviewPlan | RunStep::ReviewerReviewCode => timeouts.reviewer_seconds,
        _ => timeouts.implementer_seconds,
    }
}
