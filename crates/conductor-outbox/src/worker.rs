// crates/conductor-outbox/src/worker.rs
// ============================================================================
// Module: Outbox Worker
// Description: Claims outbox jobs, dispatches writes, applies the status FSM.
// Purpose: The process that actually performs Conductor's external GitHub
//          side effects exactly once (§4.6 Outbox Worker).
// Dependencies: conductor-core, conductor-providers
// ============================================================================

//! ## Overview
//! One worker claims `Queue::Outbox` jobs, loads the referenced
//! [`GitHubWrite`], resolves a scoped credential for the owning project,
//! renders the payload (embedding the marker where the write kind carries
//! one), and dispatches through a [`GitHubClient`]. The response is folded
//! back through [`is_allowed_status_transition`] so an implementation bug in
//! this worker can never produce an illegal status edge silently — the store
//! call simply fails.
//!
//! Crash-recovery coupling (§4.6): once a `create_pr` write reaches `sent`
//! and the run's PR bundle is still empty, this worker writes the bundle
//! itself rather than waiting for a separate event round-trip, so a crash
//! between "write sent" and "bundle recorded" cannot leave the run without
//! its PR identifiers.

use std::sync::Arc;

use conductor_core::ids::ProjectId;
use conductor_core::ids::RunId;
use conductor_core::interfaces::CredentialProvider;
use conductor_core::interfaces::JobStore;
use conductor_core::interfaces::JobStoreError;
use conductor_core::interfaces::OutboxStore;
use conductor_core::interfaces::OutboxStoreError;
use conductor_core::interfaces::RunStore;
use conductor_core::interfaces::RunStoreError;
use conductor_core::job::FailureDisposition;
use conductor_core::job::Queue;
use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteKind;
use conductor_core::outbox::GitHubWriteStatus;
use conductor_core::outbox::is_allowed_status_transition;
use conductor_core::run::PrBundle;
use conductor_core::run::RunPhase;
use conductor_core::time::Timestamp;
use conductor_providers::GitHubApiError;
use conductor_providers::GitHubClient;
use thiserror::Error;

use crate::render::build_request;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by one outbox worker iteration.
#[derive(Debug, Error)]
pub enum OutboxWorkerError {
    /// The claimed job's payload did not carry a parseable `github_write_id`.
    #[error("malformed outbox job payload: {0}")]
    MalformedJobPayload(String),
    /// The referenced run no longer exists.
    #[error("run not found for outbox write: {0}")]
    RunNotFound(RunId),
    /// Credential resolution failed.
    #[error("credential resolution failed: {0}")]
    Credential(#[from] conductor_core::interfaces::CredentialError),
    /// The job store rejected a claim/complete/fail call.
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),
    /// The outbox store rejected a read/write.
    #[error("outbox store error: {0}")]
    OutboxStore(#[from] OutboxStoreError),
    /// The run store rejected a PR-bundle write.
    #[error("run store error: {0}")]
    RunStore(#[from] RunStoreError),
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// What to do with the claimed job once a write attempt finishes.
#[derive(Debug, Clone, Copy)]
enum JobOutcome {
    /// The write reached a terminal-for-this-attempt status (`sent`,
    /// `failed`, or `ambiguous`); the job is done either way.
    Completed,
    /// GitHub rate-limited the request before it could be sent; retry the
    /// job itself rather than transitioning the write's status.
    RetryAfterMs(u64),
}

/// Configuration governing lease durations and retry policy for the outbox
/// queue (§6.4 "Per-queue lease durations and max attempts").
#[derive(Debug, Clone, Copy)]
pub struct OutboxWorkerConfig {
    /// Lease duration granted on each claim.
    pub lease_ms: u64,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self { lease_ms: 30_000 }
    }
}

/// Claims and processes jobs on `Queue::Outbox` (§4.6 Outbox Worker).
pub struct OutboxWorker {
    outbox_store: Arc<dyn OutboxStore>,
    run_store: Arc<dyn RunStore>,
    job_store: Arc<dyn JobStore>,
    github_client: Arc<dyn GitHubClient>,
    credentials: Arc<dyn CredentialProvider>,
    config: OutboxWorkerConfig,
    worker_id: String,
}

impl OutboxWorker {
    /// Builds a worker over the given backends.
    #[must_use]
    pub fn new(
        outbox_store: Arc<dyn OutboxStore>,
        run_store: Arc<dyn RunStore>,
        job_store: Arc<dyn JobStore>,
        github_client: Arc<dyn GitHubClient>,
        credentials: Arc<dyn CredentialProvider>,
        config: OutboxWorkerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            outbox_store,
            run_store,
            job_store,
            github_client,
            credentials,
            config,
            worker_id: worker_id.into(),
        }
    }

    /// Claims and processes at most one outbox job. Returns `true` if a job
    /// was claimed (regardless of whether the write ultimately succeeded),
    /// `false` if the queue was empty.
    ///
    /// # Errors
    /// Returns [`OutboxWorkerError`] for store or payload failures. A
    /// GitHub-side failure is not an error here: it is folded into the
    /// write's status and the job is completed (the retry loop lives in the
    /// status FSM and the ambiguous recovery scan, not in job retries).
    pub fn claim_and_process_one(&self) -> Result<bool, OutboxWorkerError> {
        let Some(job) = self.job_store.claim(Queue::Outbox, &self.worker_id, self.config.lease_ms)? else {
            return Ok(false);
        };

        let github_write_id = job
            .payload
            .get("github_write_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| OutboxWorkerError::MalformedJobPayload(job.job_id.to_string()))?;
        let write = self.outbox_store.get(&github_write_id.into())?;

        match self.process_write(write) {
            Ok(JobOutcome::Completed) => {
                self.job_store.complete(&job.job_id, &self.worker_id)?;
            }
            Ok(JobOutcome::RetryAfterMs(retry_after_ms)) => {
                self.job_store.fail(
                    &job.job_id,
                    &self.worker_id,
                    "rate limited by github",
                    FailureDisposition::RetryAfterMs(retry_after_ms),
                )?;
            }
            Err(err) => {
                self.job_store.fail(
                    &job.job_id,
                    &self.worker_id,
                    &err.to_string(),
                    FailureDisposition::Terminal,
                )?;
                return Err(err);
            }
        }
        Ok(true)
    }

    fn process_write(&self, write: GitHubWrite) -> Result<JobOutcome, OutboxWorkerError> {
        if matches!(
            write.status,
            GitHubWriteStatus::Sent
                | GitHubWriteStatus::Failed
                | GitHubWriteStatus::Ambiguous
                | GitHubWriteStatus::Cancelled
        ) {
            return Ok(JobOutcome::Completed);
        }
        let processing = if write.status == GitHubWriteStatus::Queued {
            let processing = GitHubWrite { status: GitHubWriteStatus::Processing, ..write };
            self.outbox_store.update_status(processing)?
        } else {
            write
        };

        let project_id = self.project_id_for_run(&processing.run_id)?;
        let credential = self.credentials.resolve(&project_id, processing.kind.as_str())?;
        let request = build_request(&processing, credential.token);

        match self.github_client.send_write(&request) {
            Ok(response) => {
                let sent = GitHubWrite {
                    status: GitHubWriteStatus::Sent,
                    github_id: Some(response.github_id),
                    github_number: response.github_number,
                    github_url: Some(response.github_url),
                    ..processing
                };
                let sent = self.outbox_store.update_status(sent)?;
                self.on_write_sent(&sent)?;
                Ok(JobOutcome::Completed)
            }
            Err(GitHubApiError::Rejected(_reason)) => {
                let failed = GitHubWrite {
                    status: GitHubWriteStatus::Failed,
                    retry_count: processing.retry_count + 1,
                    ..processing
                };
                self.outbox_store.update_status(failed)?;
                Ok(JobOutcome::Completed)
            }
            Err(GitHubApiError::RateLimited { retry_after_ms }) => {
                // Left in `Processing`: the write was never sent, so no
                // status transition applies. The job retries at the queue
                // level and re-claims this same write next attempt.
                Ok(JobOutcome::RetryAfterMs(retry_after_ms))
            }
            Err(GitHubApiError::Ambiguous(_)) => {
                let ambiguous = GitHubWrite {
                    status: GitHubWriteStatus::Ambiguous,
                    retry_count: processing.retry_count + 1,
                    ..processing
                };
                self.outbox_store.update_status(ambiguous)?;
                Ok(JobOutcome::Completed)
            }
        }
    }

    /// Crash-recovery coupling (§4.6): a `create_pr` write that reaches
    /// `sent` writes the run's PR bundle itself if it is still empty, so a
    /// crash between the write landing and the bundle being recorded cannot
    /// strand the run.
    fn on_write_sent(&self, write: &GitHubWrite) -> Result<(), OutboxWorkerError> {
        if write.kind != GitHubWriteKind::CreatePr {
            return Ok(());
        }
        let run = self
            .run_store
            .get(&write.run_id)?
            .ok_or_else(|| OutboxWorkerError::RunNotFound(write.run_id.clone()))?;
        if run.pr_bundle.is_some() {
            return Ok(());
        }
        let (Some(github_number), Some(github_url)) = (write.github_number, write.github_url.clone()) else {
            return Ok(());
        };
        let bundle = PrBundle {
            pr_number: github_number,
            pr_node_id: write.github_id.clone().unwrap_or_default(),
            pr_url: github_url,
            pr_state: "open".to_string(),
            pr_synced_at: Timestamp::now(),
        };
        self.run_store.update_pr_bundle(&write.run_id, RunPhase::AwaitingReview, bundle)?;
        Ok(())
    }

    fn project_id_for_run(&self, run_id: &RunId) -> Result<ProjectId, OutboxWorkerError> {
        let run = self.run_store.get(run_id)?.ok_or_else(|| OutboxWorkerError::RunNotFound(run_id.clone()))?;
        Ok(run.project_id)
    }

    /// Validates that transitioning `write` to `to` would be legal, without
    /// performing the transition. Exists so callers (and tests) can assert
    /// the worker never attempts an edge the status FSM forbids.
    #[must_use]
    pub fn would_be_legal_transition(write: &GitHubWrite, to: GitHubWriteStatus) -> bool {
        is_allowed_status_transition(write.status, to)
    }
}

#[cfg(test)]
mod tests {
    use super::OutboxWorker;
    use conductor_core::outbox::GitHubWrite;
    use conductor_core::outbox::GitHubWriteKind;
    use conductor_core::outbox::GitHubWriteStatus;
    use conductor_core::ids::GitHubWriteId;
    use conductor_core::ids::RunId;
    use serde_json::json;

    fn sample_write() -> GitHubWrite {
        GitHubWrite {
            github_write_id: GitHubWriteId::new("ghw_1"),
            run_id: RunId::new("run_1"),
            kind: GitHubWriteKind::CreatePr,
            target_node_id: "repo_1".to_string(),
            idempotency_key: "key_1".into(),
            payload: json!({"body": "change"}),
            payload_hash: "hash".to_string(),
            status: GitHubWriteStatus::Processing,
            github_id: None,
            github_number: None,
            github_url: None,
            retry_count: 0,
        }
    }

    #[test]
    fn legal_transition_check_matches_status_graph() {
        let write = sample_write();
        assert!(OutboxWorker::would_be_legal_transition(&write, GitHubWriteStatus::Sent));
        assert!(!OutboxWorker::would_be_legal_transition(&write, GitHubWriteStatus::Queued));
    }
}
