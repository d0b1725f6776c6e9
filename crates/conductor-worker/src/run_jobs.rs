// conductor-worker/src/run_jobs.rs
// ============================================================================
// Module: Run Job Worker
// Description: Claims `Queue::Run` jobs — worktree setup, the PR-outbox
//              kickoff, and worktree/port teardown (§4.5 "Dispatch routing").
// Purpose: These three steps manage the run's environment rather than
//          invoking an agent or writing to GitHub directly; kept apart from
//          `agent.rs` so neither worker depends on the other's concerns.
// Dependencies: conductor-core, conductor-outbox
// ============================================================================

use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::event::idempotency::derived_decision;
use conductor_core::ids::EventId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::RunId;
use conductor_core::ids::WorktreeId;
use conductor_core::job::FailureDisposition;
use conductor_core::job::Job;
use conductor_core::job::Queue;
use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteKind;
use conductor_core::outbox::GitHubWriteStatus;
use conductor_core::outbox::compute_idempotency_key;
use conductor_core::outbox::compute_payload_hash;
use conductor_core::run::Run;
use conductor_core::time::Timestamp;
use conductor_core::worktree::Worktree;
use conductor_core::worktree::WorktreeStatus;
use serde_json::Value;
use serde_json::json;
use tracing::warn;
use ulid::Ulid;

use crate::context::ConductorContext;
use crate::errors::WorkerError;

/// Claims and processes jobs on `Queue::Run` (§4.5 "start" / "resume_pr_outbox" / "cleanup").
pub struct RunJobWorker {
    ctx: ConductorContext,
    lease_ms: u64,
}

impl RunJobWorker {
    /// Builds a worker over `ctx`'s backends with the given claim lease.
    #[must_use]
    pub fn new(ctx: ConductorContext, lease_ms: u64) -> Self {
        Self { ctx, lease_ms }
    }

    /// Claims and processes at most one run-management job. Returns `true`
    /// if a job was claimed, `false` if the queue was empty.
    ///
    /// # Errors
    /// Returns [`WorkerError`] for store failures while claiming.
    pub fn claim_and_process_one(&self) -> Result<bool, WorkerError> {
        let Some(job) = self.ctx.jobs.claim(Queue::Run, &self.ctx.worker_id, self.lease_ms)? else {
            return Ok(false);
        };

        match self.process(&job) {
            Ok(Outcome::Done) => self.ctx.jobs.complete(&job.job_id, &self.ctx.worker_id)?,
            Ok(Outcome::RetryAfterMs(delay)) => {
                self.ctx.jobs.fail(
                    &job.job_id,
                    &self.ctx.worker_id,
                    "outbox write not yet terminal",
                    FailureDisposition::RetryAfterMs(delay),
                )?;
            }
            Err(err) => {
                warn!(job_id = %job.job_id, error = %err, "run job failed, will retry");
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

    fn process(&self, job: &Job) -> Result<Outcome, WorkerError> {
        let run_id = RunId::new(job.payload.get("run_id").and_then(Value::as_str).unwrap_or_default());
        let from_sequence = job.payload.get("from_sequence").and_then(Value::as_i64).unwrap_or(0);
        let run = self.ctx.runs.get(&run_id)?.ok_or_else(|| WorkerError::RunNotFound(run_id.clone()))?;

        match job.job_type.as_str() {
            "start" => self.setup_worktree(&run, from_sequence),
            "resume_pr_outbox" => self.resume_pr_outbox(&run, from_sequence),
            "cleanup" => self.cleanup(&run, from_sequence),
            other => Err(WorkerError::MalformedPayload(format!("unknown run job type: {other}"))),
        }
    }

    fn setup_worktree(&self, run: &Run, from_sequence: i64) -> Result<Outcome, WorkerError> {
        let worktree = Worktree {
            worktree_id: WorktreeId::new(Ulid::new().to_string()),
            run_id: run.run_id.clone(),
            path: format!("/var/conductor/worktrees/{}", run.run_id.as_str()),
            branch_name: format!("conductor/{}", run.run_id.as_str()),
            base_commit: run.base_branch.clone(),
            status: WorktreeStatus::Ready,
            last_heartbeat_at: Timestamp::now(),
            destroyed_at: None,
        };
        self.ctx.worktrees.create(worktree)?;
        self.emit_signal(run, from_sequence, "run.job_succeeded", json!({"step": "setup_worktree"}))?;
        Ok(Outcome::Done)
    }

    /// Ensures the run's `create_pr` write is durably enqueued, then polls
    /// its status. Reports success only once the write reaches `sent`
    /// (§4.6 "Crash-recovery coupling" records the PR bundle at that point)
    /// and failure once it reaches `failed`; any other status asks the
    /// queue to retry this same job later rather than emitting a signal.
    fn resume_pr_outbox(&self, run: &Run, from_sequence: i64) -> Result<Outcome, WorkerError> {
        let payload = json!({
            "title": format!("Conductor: {}", run.task_id.as_str()),
            "head": run.branch.clone().unwrap_or_default(),
            "base": run.base_branch.clone(),
        });
        let payload_hash = compute_payload_hash(&payload).map_err(|err| {
            WorkerError::MalformedPayload(format!("failed to hash pr payload: {err}"))
        })?;
        let target_node_id = run.run_id.as_str().to_string();
        let idempotency_key =
            IdempotencyKey::new(compute_idempotency_key(GitHubWriteKind::CreatePr, &target_node_id, &payload_hash));

        let write = GitHubWrite {
            github_write_id: conductor_core::ids::GitHubWriteId::new(Ulid::new().to_string()),
            run_id: run.run_id.clone(),
            kind: GitHubWriteKind::CreatePr,
            target_node_id,
            idempotency_key,
            payload,
            payload_hash,
            status: GitHubWriteStatus::Queued,
            github_id: None,
            github_number: None,
            github_url: None,
            retry_count: 0,
        };
        let existing = self.ctx.outbox.enqueue_write(write)?;
        self.ensure_outbox_job_queued(&existing)?;

        match existing.status {
            GitHubWriteStatus::Sent => {
                self.emit_signal(run, from_sequence, "run.job_succeeded", json!({"step": "create_pr"}))?;
                Ok(Outcome::Done)
            }
            GitHubWriteStatus::Failed => {
                self.emit_signal(
                    run,
                    from_sequence,
                    "run.job_failed",
                    json!({"step": "create_pr", "reason": "github rejected the pull request"}),
                )?;
                Ok(Outcome::Done)
            }
            GitHubWriteStatus::Cancelled => Ok(Outcome::Done),
            GitHubWriteStatus::Queued | GitHubWriteStatus::Processing | GitHubWriteStatus::Ambiguous => {
                Ok(Outcome::RetryAfterMs(5_000))
            }
        }
    }

    /// Re-enqueues the `Queue::Outbox` job for `write` if one is not already
    /// in flight, so the outbox worker actually dispatches a freshly queued
    /// write rather than waiting for an unrelated trigger.
    fn ensure_outbox_job_queued(&self, write: &GitHubWrite) -> Result<(), WorkerError> {
        if write.status != GitHubWriteStatus::Queued {
            return Ok(());
        }
        let idempotency_key = IdempotencyKey::new(derived_decision(write.github_write_id.as_str(), "outbox_kick"));
        let job = Job {
            job_id: conductor_core::ids::JobId::new(Ulid::new().to_string()),
            queue: Queue::Outbox,
            job_type: write.kind.as_str().to_string(),
            payload: json!({"github_write_id": write.github_write_id.as_str()}),
            idempotency_key,
            status: conductor_core::job::JobStatus::Queued,
            priority: 0,
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            attempts: 0,
            max_attempts: self.ctx.config.queues.outbox.max_attempts,
            last_error: None,
            next_retry_at: None,
            created_at: Timestamp::now(),
        };
        self.ctx.jobs.enqueue(job)?;
        Ok(())
    }

    fn cleanup(&self, run: &Run, from_sequence: i64) -> Result<Outcome, WorkerError> {
        if let Some(worktree) = self.ctx.worktrees.active_for_run(&run.run_id)? {
            self.ctx.worktrees.destroy(&worktree.worktree_id, Timestamp::now())?;
        }
        self.emit_signal(run, from_sequence, "run.job_succeeded", json!({"step": "cleanup"}))?;
        Ok(Outcome::Done)
    }

    fn emit_signal(&self, run: &Run, from_sequence: i64, event_type: &str, mut payload: Value) -> Result<(), WorkerError> {
        if let Value::Object(ref mut map) = payload {
            map.insert("run_id".to_string(), json!(run.run_id.as_str()));
            map.insert("from_sequence".to_string(), json!(from_sequence));
        }
        let idempotency_key = IdempotencyKey::new(derived_decision(
            &format!("{}:{}", run.run_id.as_str(), from_sequence),
            event_type,
        ));
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
            source: EventSource::System,
            created_at: Timestamp::now(),
            processed_at: None,
        };
        self.ctx.events.append_event(event)?;
        self.ctx.wake.wake(&run.run_id);
        Ok(())
    }
}

enum Outcome {
    Done,
    RetryAfterMs(u64),
}
