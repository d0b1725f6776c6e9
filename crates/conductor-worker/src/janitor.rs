// conductor-worker/src/janitor.rs
// ============================================================================
// Module: Janitor
// Description: The background sweep that reclaims stalled job leases,
//              resolves ambiguous outbox writes, force-releases worktrees
//              whose owning worker went silent, and correlates any webhook
//              facts the drain loop's per-run cursor cannot reach on its
//              own (§4.8 "Janitor sweep").
// Purpose: Keep the system self-healing without an operator watching every
//          queue; every action here is something a crashed worker would
//          otherwise leave stuck forever.
// Dependencies: conductor-core, conductor-outbox
// ============================================================================

use std::sync::Arc;

use conductor_core::time::Timestamp;
use tracing::info;
use tracing::warn;

use crate::context::ConductorContext;
use crate::drain;
use crate::errors::WorkerError;

/// One pass of the janitor sweep (§4.8). Intended to run on
/// `http.janitor_interval_seconds`; each step is independent, so a failure
/// in one does not block the others.
///
/// # Errors
/// Returns [`WorkerError`] only if a step's own store reports a hard
/// failure; best-effort sub-steps log and continue instead of propagating.
pub fn sweep_once(ctx: &ConductorContext) -> Result<SweepReport, WorkerError> {
    let now = Timestamp::now();

    let reclaimed_jobs = ctx.jobs.reclaim_stalled(now)?;
    if reclaimed_jobs > 0 {
        info!(count = reclaimed_jobs, "janitor: reclaimed stalled job leases");
    }

    let recovered_writes = recover_ambiguous_writes(ctx);

    let released_worktrees = release_stale_worktrees(ctx, now)?;

    let correlated_facts = drain::reconcile_webhook_facts(ctx)?;
    if correlated_facts > 0 {
        info!(count = correlated_facts, "janitor: correlated webhook facts to runs");
    }

    Ok(SweepReport { reclaimed_jobs, recovered_writes, released_worktrees, correlated_facts })
}

fn recover_ambiguous_writes(ctx: &ConductorContext) -> u64 {
    let outbox: Arc<dyn conductor_core::interfaces::OutboxStore> = ctx.outbox.clone();
    let github = ctx.github.clone();
    match conductor_outbox::recover_ambiguous_writes(&outbox, &github) {
        Ok(resolved) => {
            if resolved > 0 {
                info!(count = resolved, "janitor: recovered ambiguous outbox writes");
            }
            resolved
        }
        Err(err) => {
            warn!(error = %err, "janitor: ambiguous write recovery sweep failed");
            0
        }
    }
}

/// Destroys every active worktree whose heartbeat has gone stale past the
/// run's retention grace period (§4.8). A stale heartbeat means the worker
/// that owned this worktree crashed or was killed without running its
/// `cleanup` job; the janitor is the only thing that will ever free it.
fn release_stale_worktrees(ctx: &ConductorContext, now: Timestamp) -> Result<u64, WorkerError> {
    let grace_seconds = i64::from(ctx.config.retention.terminal_run_cleanup_grace_hours) * 3600;
    let worktrees = ctx.worktrees.active_worktrees()?;
    let mut released = 0u64;
    for worktree in worktrees {
        if !worktree.heartbeat_stale(now, grace_seconds) {
            continue;
        }
        ctx.worktrees.destroy(&worktree.worktree_id, now)?;
        warn!(
            worktree_id = %worktree.worktree_id,
            run_id = %worktree.run_id,
            "janitor: force-released worktree with a stale heartbeat"
        );
        released += 1;
    }
    Ok(released)
}

/// Counts of what one sweep pass actually did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Job leases reclaimed back to `queued`.
    pub reclaimed_jobs: u64,
    /// Ambiguous outbox writes resolved to `sent` or `queued`.
    pub recovered_writes: u64,
    /// Worktrees force-destroyed for a stale heartbeat.
    pub released_worktrees: u64,
    /// Webhook facts correlated to a waiting run.
    pub correlated_facts: u64,
}
