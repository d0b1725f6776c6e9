// crates/conductor-core/src/interfaces/mod.rs
// ============================================================================
// Module: Storage & Credential Interfaces
// Description: Backend-agnostic traits every persistence/credential backend implements.
// Purpose: Let the orchestrator, outbox, and sandbox depend on behavior, not a specific store.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! `conductor-store-sqlite` is the only implementation shipped in this
//! workspace, but nothing above this module knows that — every call site
//! takes `&dyn EventStore`, `&dyn RunStore`, etc. Implementations must be
//! deterministic and fail closed on missing or invalid data; none of these
//! traits permit silently losing a write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::artifact::Artifact;
use crate::artifact::ArtifactKind;
use crate::event::Event;
use crate::gate::GateEvaluation;
use crate::gate::RoutingDecision;
use crate::ids::ArtifactId;
use crate::ids::GateId;
use crate::ids::GitHubWriteId;
use crate::ids::IdempotencyKey;
use crate::ids::JobId;
use crate::ids::PolicySetId;
use crate::ids::RunId;
use crate::ids::WorktreeId;
use crate::job::Job;
use crate::job::Queue;
use crate::outbox::GitHubWrite;
use crate::policy::Override;
use crate::policy::PolicySet;
use crate::policy::PolicyViolation;
use crate::run::Run;
use crate::run::RunPhase;
use crate::time::Timestamp;
use crate::worktree::PortLease;
use crate::worktree::Worktree;

// ============================================================================
// SECTION: Event Store
// ============================================================================

/// Event store errors (§4.1 "Failure model").
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The idempotency key was already used by a previously persisted event.
    /// Callers should treat this as success and use the returned event.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),
    /// A concurrent sequence allocator raced this insert; retry under a
    /// fresh sequence.
    #[error("sequence conflict for run {run_id}")]
    SequenceConflict {
        /// The run whose sequence allocation conflicted.
        run_id: RunId,
    },
    /// Underlying storage I/O failure.
    #[error("event store io error: {0}")]
    Io(String),
}

/// The append-only event log (§4.1 Event Log & Sequencer).
pub trait EventStore: Send + Sync {
    /// Persists `event`, allocating its sequence (if run-scoped) in the
    /// same transaction as the insert, under a row lock on the run's
    /// `next_sequence` counter.
    ///
    /// # Errors
    /// Returns [`EventStoreError::DuplicateIdempotencyKey`] if the event's
    /// idempotency key was already used, or
    /// [`EventStoreError::SequenceConflict`] on an allocator race.
    fn append_event(&self, event: Event) -> Result<Event, EventStoreError>;

    /// Returns the smallest-sequence unprocessed event for `run_id` whose
    /// predecessors (by sequence) are all already processed, if any
    /// (§4.5 "Drain loop" step 2).
    ///
    /// # Errors
    /// Returns [`EventStoreError::Io`] on storage failure.
    fn next_unprocessed_event(&self, run_id: &RunId) -> Result<Option<Event>, EventStoreError>;

    /// Marks `event_id` processed as of `processed_at`, in the same
    /// transaction as any projection mutation it caused.
    ///
    /// # Errors
    /// Returns [`EventStoreError::Io`] on storage failure.
    fn mark_processed(&self, event_id: &crate::ids::EventId, processed_at: Timestamp) -> Result<(), EventStoreError>;

    /// Lists decision-class events for a run in sequence order, for
    /// projection replay (§8 "Replaying all `decision` events...").
    ///
    /// # Errors
    /// Returns [`EventStoreError::Io`] on storage failure.
    fn decision_events_for_run(&self, run_id: &RunId) -> Result<Vec<Event>, EventStoreError>;

    /// Returns unprocessed, run-unscoped fact events (webhook deliveries
    /// accepted before correlation to a run), oldest first. The drain
    /// loop's per-run cursor never reaches these since they carry no
    /// `run_id`; a separate correlation sweep consumes this list and, once
    /// it resolves a fact to a run, emits a run-scoped derived event and
    /// marks the original processed.
    ///
    /// # Errors
    /// Returns [`EventStoreError::Io`] on storage failure.
    fn pending_fact_events(&self) -> Result<Vec<Event>, EventStoreError>;
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Run store errors.
#[derive(Debug, Error)]
pub enum RunStoreError {
    /// The CAS precondition (`expected_phase`, and `expected_step` where
    /// relevant) did not match the run's current row.
    #[error("stale transition for run {run_id}: expected {expected_phase:?}")]
    StaleTransition {
        /// The run the CAS targeted.
        run_id: RunId,
        /// The phase the caller expected.
        expected_phase: RunPhase,
    },
    /// No run exists with the given id.
    #[error("run not found: {0}")]
    NotFound(RunId),
    /// Underlying storage I/O failure.
    #[error("run store io error: {0}")]
    Io(String),
}

/// The run projection store (§4.2 Run Projection & State Machine).
pub trait RunStore: Send + Sync {
    /// Loads a run by id.
    ///
    /// # Errors
    /// Returns [`RunStoreError::Io`] on storage failure.
    fn get(&self, run_id: &RunId) -> Result<Option<Run>, RunStoreError>;

    /// Applies a phase transition with the optimistic-lock precondition
    /// that the run's current phase equals `expected_phase`
    /// (§4.2 "Optimistic locking").
    ///
    /// # Errors
    /// Returns [`RunStoreError::StaleTransition`] if the precondition did
    /// not hold, in which case nothing was mutated.
    fn transition_phase(
        &self,
        run_id: &RunId,
        expected_phase: RunPhase,
        updated: Run,
    ) -> Result<Run, RunStoreError>;

    /// Sets or clears `paused_at`/`paused_by` without touching `phase`
    /// (§4.2 "Pause").
    ///
    /// # Errors
    /// Returns [`RunStoreError::NotFound`] if the run does not exist.
    fn set_paused(&self, run_id: &RunId, paused_by: Option<String>) -> Result<Run, RunStoreError>;

    /// Writes the run's PR bundle, CAS-guarded by expected phase/step
    /// (§4.6 "Crash-recovery coupling with run state").
    ///
    /// # Errors
    /// Returns [`RunStoreError::StaleTransition`] if the run has moved past
    /// the expected phase.
    fn update_pr_bundle(
        &self,
        run_id: &RunId,
        expected_phase: RunPhase,
        bundle: crate::run::PrBundle,
    ) -> Result<Run, RunStoreError>;

    /// Finds the run carrying `pr_number` in its PR bundle, if any. Used to
    /// correlate an inbound "PR closed"/"PR merged" webhook fact (which
    /// carries no `run_id`) back to the run parked in `wait_pr_merge`
    /// (§4.2 "Checkpoints": `PrCreated` evidence is `pr_number`, `head_sha`).
    ///
    /// # Errors
    /// Returns [`RunStoreError::Io`] on storage failure.
    fn find_by_pr_number(&self, pr_number: i64) -> Result<Option<Run>, RunStoreError>;
}

// ============================================================================
// SECTION: Gate Store
// ============================================================================

/// Gate store errors.
#[derive(Debug, Error)]
pub enum GateStoreError {
    /// Underlying storage I/O failure.
    #[error("gate store io error: {0}")]
    Io(String),
    /// The causation event referenced by a gate evaluation does not exist.
    #[error("causation event not found: {0}")]
    CausationEventMissing(String),
}

/// The append-only gate evaluation log (§4.3 Gate Evaluator).
pub trait GateStore: Send + Sync {
    /// Appends a gate evaluation. Pure append; no update-in-place.
    ///
    /// # Errors
    /// Returns [`GateStoreError::CausationEventMissing`] if the causation
    /// event id does not reference a real event.
    fn record_evaluation(&self, evaluation: GateEvaluation) -> Result<GateEvaluation, GateStoreError>;

    /// Returns all evaluations recorded for a run, for `latestGate`/
    /// `gatesFor` projection.
    ///
    /// # Errors
    /// Returns [`GateStoreError::Io`] on storage failure.
    fn evaluations_for_run(&self, run_id: &RunId) -> Result<Vec<GateEvaluation>, GateStoreError>;

    /// Persists the routing decision captured at routing time
    /// (§4.3 "Required vs optional gates per run").
    ///
    /// # Errors
    /// Returns [`GateStoreError::Io`] on storage failure.
    fn record_routing_decision(&self, decision: RoutingDecision) -> Result<(), GateStoreError>;

    /// Loads the routing decision for a run, if one has been recorded.
    ///
    /// # Errors
    /// Returns [`GateStoreError::Io`] on storage failure.
    fn routing_decision_for_run(&self, run_id: &RunId) -> Result<Option<RoutingDecision>, GateStoreError>;
}

// ============================================================================
// SECTION: Job Store
// ============================================================================

/// Job store errors (§4.4 Job Queue).
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// A job with this idempotency key already exists; callers should use
    /// the existing row.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),
    /// No job with the given id exists, or it was claimed by another worker.
    #[error("job not found or not owned by caller: {0}")]
    NotFoundOrNotOwned(JobId),
    /// Underlying storage I/O failure.
    #[error("job store io error: {0}")]
    Io(String),
}

/// Outcome of a `fail` call, distinguishing a retryable failure from a
/// terminal one (§4.4 "`fail(job_id, error, { retry_after_ms | terminal })`").
#[derive(Debug, Clone, Copy)]
pub enum FailureDisposition {
    /// Retry after the given delay, if attempts remain.
    RetryAfterMs(u64),
    /// Do not retry regardless of attempts remaining.
    Terminal,
}

/// The durable job queue (§4.4 Job Queue).
pub trait JobStore: Send + Sync {
    /// Enqueues a job. On a duplicate idempotency key, returns the existing
    /// row without creating a new one or incrementing its attempt count.
    ///
    /// # Errors
    /// Returns [`JobStoreError::Io`] on storage failure.
    fn enqueue(&self, job: Job) -> Result<Job, JobStoreError>;

    /// Atomically claims the highest-priority queued job on `queue`
    /// (`priority DESC, created_at ASC`), setting `status=processing` and
    /// a lease of `lease_ms` (§4.4 "`claim`").
    ///
    /// # Errors
    /// Returns [`JobStoreError::Io`] on storage failure.
    fn claim(&self, queue: Queue, worker_id: &str, lease_ms: u64) -> Result<Option<Job>, JobStoreError>;

    /// Marks a claimed job completed.
    ///
    /// # Errors
    /// Returns [`JobStoreError::NotFoundOrNotOwned`] if `worker_id` does
    /// not currently hold the job's lease.
    fn complete(&self, job_id: &JobId, worker_id: &str) -> Result<(), JobStoreError>;

    /// Marks a claimed job failed, with the given disposition.
    ///
    /// # Errors
    /// Returns [`JobStoreError::NotFoundOrNotOwned`] if `worker_id` does
    /// not currently hold the job's lease.
    fn fail(
        &self,
        job_id: &JobId,
        worker_id: &str,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<(), JobStoreError>;

    /// Extends a claimed job's lease by `lease_ms` from now.
    ///
    /// # Errors
    /// Returns [`JobStoreError::NotFoundOrNotOwned`] if `worker_id` does
    /// not currently hold the job's lease.
    fn extend_lease(&self, job_id: &JobId, worker_id: &str, lease_ms: u64) -> Result<(), JobStoreError>;

    /// Reverts every job with an expired lease back to `queued`, respecting
    /// `max_attempts` (§4.4 "`reclaimStalled`").
    ///
    /// Returns the number of jobs reclaimed.
    ///
    /// # Errors
    /// Returns [`JobStoreError::Io`] on storage failure.
    fn reclaim_stalled(&self, now: Timestamp) -> Result<u64, JobStoreError>;
}

// ============================================================================
// SECTION: Outbox Store
// ============================================================================

/// Outbox store errors (§4.6 Outbox Worker).
#[derive(Debug, Error)]
pub enum OutboxStoreError {
    /// A write with this idempotency key already exists.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),
    /// No write with the given id exists.
    #[error("github write not found: {0}")]
    NotFound(GitHubWriteId),
    /// Underlying storage I/O failure.
    #[error("outbox store io error: {0}")]
    Io(String),
}

/// The outbox's durable write log (§4.6 Outbox Worker).
pub trait OutboxStore: Send + Sync {
    /// Enqueues a write. On a duplicate idempotency key, returns the
    /// existing row.
    ///
    /// # Errors
    /// Returns [`OutboxStoreError::Io`] on storage failure.
    fn enqueue_write(&self, write: GitHubWrite) -> Result<GitHubWrite, OutboxStoreError>;

    /// Loads a write by id.
    ///
    /// # Errors
    /// Returns [`OutboxStoreError::NotFound`] if no such row exists.
    fn get(&self, id: &GitHubWriteId) -> Result<GitHubWrite, OutboxStoreError>;

    /// Transitions a write's status, validated against
    /// [`crate::outbox::is_allowed_status_transition`] by the caller.
    ///
    /// # Errors
    /// Returns [`OutboxStoreError::NotFound`] if no such row exists.
    fn update_status(&self, write: GitHubWrite) -> Result<GitHubWrite, OutboxStoreError>;

    /// Returns ambiguous rows eligible for recovery scanning
    /// (§4.6 "Recovery scope").
    ///
    /// # Errors
    /// Returns [`OutboxStoreError::Io`] on storage failure.
    fn ambiguous_writes(&self) -> Result<Vec<GitHubWrite>, OutboxStoreError>;
}

// ============================================================================
// SECTION: Artifact Store
// ============================================================================

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    /// Underlying storage I/O failure.
    #[error("artifact store io error: {0}")]
    Io(String),
}

/// The append-only, versioned artifact log (§3 Artifact).
pub trait ArtifactStore: Send + Sync {
    /// Records a new artifact version. Callers are responsible for
    /// computing the next `version` for `(run_id, kind)`.
    ///
    /// # Errors
    /// Returns [`ArtifactStoreError::Io`] on storage failure.
    fn record(&self, artifact: Artifact) -> Result<Artifact, ArtifactStoreError>;

    /// Returns the most recent artifact of `kind` for a run, if any.
    ///
    /// # Errors
    /// Returns [`ArtifactStoreError::Io`] on storage failure.
    fn latest(&self, run_id: &RunId, kind: ArtifactKind) -> Result<Option<Artifact>, ArtifactStoreError>;

    /// Loads a specific artifact by id.
    ///
    /// # Errors
    /// Returns [`ArtifactStoreError::Io`] on storage failure.
    fn get(&self, artifact_id: &ArtifactId) -> Result<Option<Artifact>, ArtifactStoreError>;
}

// ============================================================================
// SECTION: Policy Store
// ============================================================================

/// Policy store errors.
#[derive(Debug, Error)]
pub enum PolicyStoreError {
    /// Underlying storage I/O failure.
    #[error("policy store io error: {0}")]
    Io(String),
}

/// The policy snapshot, violation, and override store (§3 PolicySet/...).
pub trait PolicyStore: Send + Sync {
    /// Returns the policy set currently in effect.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::Io`] on storage failure.
    fn current_policy_set(&self) -> Result<PolicySet, PolicyStoreError>;

    /// Loads a specific policy snapshot by id (used when re-evaluating
    /// against the snapshot a past violation referenced).
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::Io`] on storage failure.
    fn policy_set(&self, id: &PolicySetId) -> Result<Option<PolicySet>, PolicyStoreError>;

    /// Records a policy violation.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::Io`] on storage failure.
    fn record_violation(&self, violation: PolicyViolation) -> Result<PolicyViolation, PolicyStoreError>;

    /// Records an operator-granted override.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::Io`] on storage failure.
    fn record_override(&self, grant: Override) -> Result<Override, PolicyStoreError>;

    /// Returns active overrides applicable to a run (its own scope plus any
    /// broader scope covering it).
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::Io`] on storage failure.
    fn active_overrides_for_run(&self, run_id: &RunId) -> Result<Vec<Override>, PolicyStoreError>;
}

// ============================================================================
// SECTION: Worktree Store
// ============================================================================

/// Worktree store errors (§5 "Worktrees").
#[derive(Debug, Error)]
pub enum WorktreeStoreError {
    /// The run already has an active worktree.
    #[error("run {0} already has an active worktree")]
    AlreadyActive(RunId),
    /// The project's ports are all currently leased.
    #[error("no free port available for project")]
    PortExhausted,
    /// Underlying storage I/O failure.
    #[error("worktree store io error: {0}")]
    Io(String),
}

/// Worktree and port lease lifecycle (§3 Worktree, §5 "Ports"/"Worktrees").
pub trait WorktreeStore: Send + Sync {
    /// Creates the run's worktree. Fails if one is already active
    /// (at most one active worktree per run).
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::AlreadyActive`] if the run already has
    /// a live worktree.
    fn create(&self, worktree: Worktree) -> Result<Worktree, WorktreeStoreError>;

    /// Marks a worktree destroyed, freeing it for a future retry to
    /// recreate.
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::Io`] on storage failure.
    fn destroy(&self, worktree_id: &WorktreeId, destroyed_at: Timestamp) -> Result<(), WorktreeStoreError>;

    /// Returns the run's active worktree, if any.
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::Io`] on storage failure.
    fn active_for_run(&self, run_id: &RunId) -> Result<Option<Worktree>, WorktreeStoreError>;

    /// Returns every worktree not yet destroyed, for the janitor's
    /// stale-heartbeat and terminal-run grace-period sweeps (§4.8).
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::Io`] on storage failure.
    fn active_worktrees(&self) -> Result<Vec<Worktree>, WorktreeStoreError>;

    /// Leases the next free port in the project's configured range.
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::PortExhausted`] if no port is free.
    fn lease_port(&self, worktree_id: &WorktreeId) -> Result<PortLease, WorktreeStoreError>;

    /// Releases a held port lease.
    ///
    /// # Errors
    /// Returns [`WorktreeStoreError::Io`] on storage failure.
    fn release_port(&self, lease: &PortLease) -> Result<(), WorktreeStoreError>;
}

// ============================================================================
// SECTION: Credential Provider
// ============================================================================

/// A short-lived credential scoped to one job (§5 "External credentials").
#[derive(Debug, Clone)]
pub struct ScopedCredential {
    /// The bearer token value. Never logged by conforming implementations.
    pub token: String,
    /// When this token expires and must be re-resolved.
    pub expires_at: Timestamp,
}

/// Credential resolution errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The installation backing this project's credentials was revoked or
    /// not found.
    #[error("no credentials available for project {0}")]
    Unavailable(String),
    /// The upstream credential exchange failed.
    #[error("credential exchange failed: {0}")]
    ExchangeFailed(String),
}

/// Resolves short-lived GitHub credentials per job, by step
/// (§5 "External credentials"). Agents never see these tokens directly;
/// only the outbox worker and git plumbing do.
pub trait CredentialProvider: Send + Sync {
    /// Resolves a scoped credential for the given project and step.
    ///
    /// # Errors
    /// Returns [`CredentialError`] if no credential can be resolved.
    fn resolve(&self, project_id: &crate::ids::ProjectId, step: &str) -> Result<ScopedCredential, CredentialError>;
}
