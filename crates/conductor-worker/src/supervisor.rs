// conductor-worker/src/supervisor.rs
// ============================================================================
// Module: Background Loop Supervisor
// Description: Spawns the tokio tasks `conductor-cli serve` needs beyond
//              the axum listener: drain supervisor, janitor tick, and the
//              three job-queue claim loops (§2 "Process topology").
// Purpose: Keep process wiring in one place so `conductor-cli`'s `serve`
//          command stays a thin composition of library pieces.
// Dependencies: conductor-core, conductor-outbox, tokio
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use conductor_core::ids::RunId;
use conductor_outbox::OutboxWorker;
use conductor_outbox::OutboxWorkerConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::warn;

use crate::agent::AgentJobWorker;
use crate::agent::AgentRuntime;
use crate::agent::AgentWorkerConfig;
use crate::context::ConductorContext;
use crate::drain;
use crate::janitor;
use crate::run_jobs::RunJobWorker;

/// Tunables for the background loops, distinct from per-request HTTP
/// config since these run for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Maximum number of runs drained concurrently (§2 "bounded by
    /// `tokio::sync::Semaphore`").
    pub drain_concurrency: usize,
    /// Janitor sweep interval.
    pub janitor_interval: Duration,
    /// How long a worker backs off after finding an empty queue before
    /// polling it again.
    pub idle_poll_interval: Duration,
}

/// Every background task spawned for one process lifetime, so the caller
/// can await or abort them together on shutdown.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Aborts every spawned task. Used on `SIGTERM`/`SIGINT` alongside the
    /// axum listener's own graceful shutdown.
    pub fn abort_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Awaits every spawned task to completion (they normally run forever,
    /// so this only returns once all have been aborted or have panicked).
    pub async fn join_all(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawns the drain supervisor, janitor tick, and the three job-queue claim
/// loops against `ctx`. `agent_runtime` is the caller's
/// [`AgentRuntime`] implementation — this crate defines the seam but no
/// concrete provider (§1 Non-goals).
#[must_use]
pub fn spawn_background_loops(
    ctx: ConductorContext,
    agent_runtime: Arc<dyn AgentRuntime>,
    config: SupervisorConfig,
) -> BackgroundTasks {
    let mut handles = Vec::new();

    handles.push(spawn_drain_supervisor(ctx.clone(), config));
    handles.push(spawn_janitor(ctx.clone(), config));
    handles.push(spawn_run_job_loop(ctx.clone(), config));
    handles.push(spawn_agent_job_loop(ctx.clone(), agent_runtime, config));
    handles.push(spawn_outbox_job_loop(ctx, config));

    BackgroundTasks { handles }
}

fn spawn_drain_supervisor(ctx: ConductorContext, config: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut feed) = ctx.wake.take_feed() else {
            error!("drain supervisor: wake feed already taken, refusing to start a second supervisor");
            return;
        };
        let semaphore = Arc::new(Semaphore::new(config.drain_concurrency.max(1)));

        while let Some(run_id) = feed.recv().await {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                drain_run_to_quiescence(&ctx, &run_id);
                drop(permit);
            });
        }
    })
}

/// Drains `run_id` until [`drain::drain_run_once`] reports no more
/// unprocessed events. Run synchronously (the store calls are blocking)
/// inside the tokio task spawned per wake.
fn drain_run_to_quiescence(ctx: &ConductorContext, run_id: &RunId) {
    loop {
        match drain::drain_run_once(ctx, run_id) {
            Ok(true) => continue,
            Ok(false) => return,
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "drain loop iteration failed, will retry on next wake");
                return;
            }
        }
    }
}

fn spawn_janitor(ctx: ConductorContext, config: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.janitor_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = janitor::sweep_once(&ctx) {
                warn!(error = %err, "janitor sweep failed");
            }
        }
    })
}

fn spawn_run_job_loop(ctx: ConductorContext, config: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker = RunJobWorker::new(ctx.clone(), ctx.config.queues.run.lease_ms);
        claim_loop(config, move || worker.claim_and_process_one().map_err(|err| err.to_string())).await;
    })
}

fn spawn_agent_job_loop(ctx: ConductorContext, runtime: Arc<dyn AgentRuntime>, config: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lease_ms = ctx.config.queues.agent.lease_ms;
        let worker = AgentJobWorker::new(ctx, runtime, AgentWorkerConfig { lease_ms });
        claim_loop(config, move || worker.claim_and_process_one().map_err(|err| err.to_string())).await;
    })
}

fn spawn_outbox_job_loop(ctx: ConductorContext, config: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lease_ms = ctx.config.queues.outbox.lease_ms;
        let worker = OutboxWorker::new(
            ctx.outbox.clone(),
            ctx.runs.clone(),
            ctx.jobs.clone(),
            ctx.github.clone(),
            ctx.credentials.clone(),
            OutboxWorkerConfig { lease_ms },
            ctx.worker_id.to_string(),
        );
        claim_loop(config, move || worker.claim_and_process_one().map_err(|err| err.to_string())).await;
    })
}

/// Polls `claim_one` in a loop: an immediate re-poll after a claimed job,
/// a short backoff after an empty queue, a short backoff after an error
/// (the worker itself already recorded the failure against the job).
async fn claim_loop(config: SupervisorConfig, claim_one: impl Fn() -> Result<bool, String>) {
    loop {
        match claim_one() {
            Ok(true) => continue,
            Ok(false) => tokio::time::sleep(config.idle_poll_interval).await,
            Err(err) => {
                warn!(error = %err, "job worker claim loop error");
                tokio::time::sleep(config.idle_poll_interval).await;
            }
        }
    }
}
