// conductor-worker/src/lib.rs
// ============================================================================
// Crate: conductor-worker
// Description: The orchestrator process — job-queue workers, the per-run
//              drain loop, the janitor sweep, and the axum HTTP surface
//              (§2 "Process topology", §4.5, §4.8, §6.2, §6.3).
// Purpose: Everything `conductor-cli serve` boots lives here as a library
//          so it can also be driven directly from `system-tests`.
// ============================================================================

//! ## Overview
//! Four things share one [`ConductorContext`] here: the job-queue workers
//! ([`run_jobs`], [`agent`]) that claim and execute queued work, the
//! per-run [`drain`] loop that turns committed events into the next
//! dispatched job, the [`janitor`] sweep that reclaims what a crashed
//! worker left behind, and the [`router`] that accepts GitHub webhooks and
//! operator actions over HTTP. [`supervisor::spawn_background_loops`]
//! wires all of them into one set of tokio tasks for `conductor-cli serve`.

pub mod actions;
pub mod agent;
pub mod context;
pub mod dispatch;
pub mod drain;
pub mod errors;
pub mod janitor;
pub mod notify;
pub mod progression;
pub mod router;
pub mod run_jobs;
pub mod webhook;

mod supervisor;

pub use context::ConductorContext;
pub use errors::WorkerError;
pub use notify::RunWakeRegistry;
pub use supervisor::SupervisorConfig;
pub use supervisor::spawn_background_loops;
