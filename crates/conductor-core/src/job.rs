// crates/conductor-core/src/job.rs
// ============================================================================
// Module: Job Queue
// Description: Durable queue row model: leases, retries, idempotency, priority.
// Purpose: Back the three logical queues (run, agent, outbox) with one contract.
// Dependencies: serde
// ============================================================================

use crate::ids::IdempotencyKey;
use crate::ids::JobId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Queue & Status
// ============================================================================

/// The three logical queues sharing one `jobs` table (§4.4 Job Queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    /// Worktree setup, PR-outbox kicks, cleanup.
    Run,
    /// Planner/implementer/reviewer/tester agent invocations.
    Agent,
    /// GitHub outbox writes.
    Outbox,
}

/// Lifecycle status of a job row (§3 Job `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker; lease active.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully with no further retries.
    Failed,
    /// Administratively cancelled.
    Cancelled,
}

// ============================================================================
// SECTION: Job
// ============================================================================

/// A durable job queue row (§3 Job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Primary key.
    pub job_id: JobId,
    /// Which logical queue this job belongs to.
    pub queue: Queue,
    /// Job type, e.g. `planner.create_plan`, `outbox.create_pr`.
    pub job_type: String,
    /// Opaque, type-specific payload. For agent jobs dispatched against a
    /// run, this carries the episode guard `from_sequence`
    /// (§4.2 "Episode guard").
    pub payload: Value,
    /// Deduplication key, unique across all jobs.
    pub idempotency_key: IdempotencyKey,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Higher values claim first, within `created_at ASC` ties
    /// (§4.4 "claim").
    pub priority: i32,
    /// Worker id holding the current lease, if `status == Processing`.
    pub claimed_by: Option<String>,
    /// When the current lease was acquired.
    pub claimed_at: Option<Timestamp>,
    /// When the current lease expires; past this, [`reclaim_stalled`]-style
    /// logic in the store reverts the job to `Queued`.
    pub lease_expires_at: Option<Timestamp>,
    /// Number of claim attempts so far, including the current one.
    pub attempts: u32,
    /// Attempts beyond which the job becomes terminally `Failed`.
    pub max_attempts: u32,
    /// The most recent failure's human-readable message.
    pub last_error: Option<String>,
    /// Earliest time a failed-but-retryable job may be claimed again.
    pub next_retry_at: Option<Timestamp>,
    /// When the row was inserted.
    pub created_at: Timestamp,
}

impl Job {
    /// Returns whether this job's lease has expired as of `now`
    /// (§4.4 "`reclaimStalled`").
    #[must_use]
    pub fn lease_expired(&self, now: Timestamp) -> bool {
        self.status == JobStatus::Processing
            && self.lease_expires_at.is_some_and(|expiry| expiry < now)
    }

    /// Returns whether another claim attempt is permitted.
    #[must_use]
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

// ============================================================================
// SECTION: Backoff
// ============================================================================

/// Computes exponential backoff with jitter, capped at `max_delay_ms`
/// (§4.4 "Retry/backoff").
///
/// `jitter_fraction` must be in `[0.0, 1.0]`; callers supply it from a
/// random source so this function stays deterministic and testable.
#[must_use]
pub fn backoff_delay_ms(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_fraction: f64) -> u64 {
    let exponent = attempt.min(32);
    let unjittered = base_delay_ms.saturating_mul(1u64 << exponent).min(max_delay_ms);
    let jitter_fraction = jitter_fraction.clamp(0.0, 1.0);
    #[allow(
        clippy::cast_precision_loss,
        reason = "delay magnitudes are small enough that precision loss is inconsequential"
    )]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "result is re-clamped to max_delay_ms before being used"
    )]
    #[allow(
        clippy::cast_sign_loss,
        reason = "jitter_fraction is clamped to [0.0, 1.0] above, so the product is non-negative"
    )]
    let jittered = (unjittered as f64 * (1.0 + jitter_fraction)) as u64;
    jittered.min(max_delay_ms)
}
