// conductor-outbox/tests/worker_integration.rs
// ============================================================================
// Module: Outbox Worker Integration Tests
// Description: Exercises `OutboxWorker::claim_and_process_one` end to end
//              against a real `SqliteStore` and a scripted `GitHubClient`.
// Dependencies: conductor-core, conductor-providers, conductor-store-sqlite
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::ids::GitHubWriteId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::JobId;
use conductor_core::ids::ProjectId;
use conductor_core::ids::RepoId;
use conductor_core::ids::RunId;
use conductor_core::ids::TaskId;
use conductor_core::interfaces::JobStore;
use conductor_core::interfaces::OutboxStore;
use conductor_core::interfaces::RunStore;
use conductor_core::job::Job;
use conductor_core::job::JobStatus;
use conductor_core::job::Queue;
use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteKind;
use conductor_core::outbox::GitHubWriteStatus;
use conductor_core::run::IterationCounters;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;
use conductor_core::time::Timestamp;
use conductor_outbox::recovery::recover_ambiguous_writes;
use conductor_outbox::worker::OutboxWorker;
use conductor_outbox::worker::OutboxWorkerConfig;
use conductor_providers::FakeGitHubClient;
use conductor_providers::GitHubApiError;
use conductor_providers::GitHubWriteResponse;
use conductor_providers::StaticCredentialProvider;
use conductor_store_sqlite::SqliteStore;
use conductor_store_sqlite::SqliteStoreConfig;

fn fresh_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open store"))
}

fn credentials() -> Arc<StaticCredentialProvider> {
    let mut tokens = HashMap::new();
    tokens.insert(
        "proj_1".to_string(),
        ("ghs_test_token".to_string(), Timestamp::parse("2099-01-01T00:00:00Z").expect("valid")),
    );
    Arc::new(StaticCredentialProvider::new(tokens))
}

fn sample_run() -> Run {
    let now = Timestamp::now();
    Run {
        run_id: RunId::new("run_1"),
        task_id: TaskId::new("task_1"),
        project_id: ProjectId::new("proj_1"),
        repo_id: RepoId::new("repo_1"),
        run_number: 1,
        parent_run_id: None,
        supersedes_run_id: None,
        phase: RunPhase::AwaitingReview,
        step: RunStep::CreatePr,
        next_sequence: 1,
        last_event_sequence: 0,
        paused_at: None,
        paused_by: None,
        blocked_context: None,
        base_branch: "main".into(),
        branch: Some("conductor/run-1".into()),
        head_sha: Some("deadbeef".into()),
        pr_bundle: None,
        iterations: IterationCounters::default(),
        result: None,
        result_reason: None,
        checkpoints: Vec::new(),
        artifact_ids: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

fn sample_write(write_id: &str, kind: GitHubWriteKind) -> GitHubWrite {
    GitHubWrite {
        github_write_id: GitHubWriteId::new(write_id),
        run_id: RunId::new("run_1"),
        kind,
        target_node_id: "PR_node_1".to_string(),
        idempotency_key: IdempotencyKey::new(format!("{write_id}_key")),
        payload: serde_json::json!({"title": "Fix the bug"}),
        payload_hash: "hash_1".to_string(),
        status: GitHubWriteStatus::Queued,
        github_id: None,
        github_number: None,
        github_url: None,
        retry_count: 0,
    }
}

/// Seeds an outbox write and its corresponding `Queue::Outbox` job, the way
/// the run-logic layer does when it decides a write is needed.
fn seed_write_and_job(store: &Arc<SqliteStore>, write: GitHubWrite) -> JobId {
    let write_id = write.github_write_id.clone();
    store.enqueue_write(write).expect("enqueue write");
    let job = Job {
        job_id: JobId::new(format!("job_{write_id}")),
        queue: Queue::Outbox,
        job_type: "outbox.dispatch".into(),
        payload: serde_json::json!({"github_write_id": write_id.as_str()}),
        idempotency_key: IdempotencyKey::new(format!("job_{write_id}_key")),
        status: JobStatus::Queued,
        priority: 0,
        claimed_by: None,
        claimed_at: None,
        lease_expires_at: None,
        attempts: 0,
        max_attempts: 5,
        next_retry_at: None,
        last_error: None,
        created_at: Timestamp::now(),
    };
    let enqueued = store.enqueue(job).expect("enqueue job");
    enqueued.job_id
}

#[test]
fn successful_write_couples_pr_bundle_crash_recovery() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    seed_write_and_job(&store, sample_write("ghw_1", GitHubWriteKind::CreatePr));

    let github = Arc::new(FakeGitHubClient::new(vec![Ok(GitHubWriteResponse {
        github_id: "PR_kwDOAbc".to_string(),
        github_number: Some(7),
        github_url: "https://github.com/acme/widgets/pull/7".to_string(),
    })]));

    let worker = OutboxWorker::new(
        store.clone() as Arc<dyn OutboxStore>,
        store.clone() as Arc<dyn conductor_core::interfaces::RunStore>,
        store.clone() as Arc<dyn JobStore>,
        github.clone() as Arc<dyn conductor_providers::GitHubClient>,
        credentials() as Arc<dyn conductor_core::interfaces::CredentialProvider>,
        OutboxWorkerConfig::default(),
        "worker_1",
    );

    let claimed = worker.claim_and_process_one().expect("process write");
    assert!(claimed, "a queued job was available to claim");

    let updated = store.get(&GitHubWriteId::new("ghw_1")).expect("load write");
    assert_eq!(updated.status, GitHubWriteStatus::Sent);
    assert_eq!(updated.github_number, Some(7));

    let run = RunStore::get(store.as_ref(), &RunId::new("run_1")).expect("load run").expect("run present");
    let bundle = run.pr_bundle.expect("pr bundle written by crash-recovery coupling");
    assert_eq!(bundle.pr_number, 7);
    assert_eq!(bundle.pr_url, "https://github.com/acme/widgets/pull/7");

    assert_eq!(github.sent_writes().len(), 1);
}

#[test]
fn rejected_write_is_marked_failed_and_job_completes() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    seed_write_and_job(&store, sample_write("ghw_rejected", GitHubWriteKind::CreatePr));

    let github = Arc::new(FakeGitHubClient::new(vec![Err(GitHubApiError::Rejected("422 unprocessable".to_string()))]));

    let worker = OutboxWorker::new(
        store.clone() as Arc<dyn OutboxStore>,
        store.clone() as Arc<dyn conductor_core::interfaces::RunStore>,
        store.clone() as Arc<dyn JobStore>,
        github as Arc<dyn conductor_providers::GitHubClient>,
        credentials() as Arc<dyn conductor_core::interfaces::CredentialProvider>,
        OutboxWorkerConfig::default(),
        "worker_1",
    );

    assert!(worker.claim_and_process_one().expect("process write"));

    let updated = store.get(&GitHubWriteId::new("ghw_rejected")).expect("load write");
    assert_eq!(updated.status, GitHubWriteStatus::Failed);
    assert_eq!(updated.retry_count, 1);
}

#[test]
fn rate_limited_write_is_left_processing_and_job_is_retried() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    seed_write_and_job(&store, sample_write("ghw_rl", GitHubWriteKind::CreatePr));

    let github = Arc::new(FakeGitHubClient::new(vec![Err(GitHubApiError::RateLimited { retry_after_ms: 5_000 })]));

    let worker = OutboxWorker::new(
        store.clone() as Arc<dyn OutboxStore>,
        store.clone() as Arc<dyn conductor_core::interfaces::RunStore>,
        store.clone() as Arc<dyn JobStore>,
        github as Arc<dyn conductor_providers::GitHubClient>,
        credentials() as Arc<dyn conductor_core::interfaces::CredentialProvider>,
        OutboxWorkerConfig::default(),
        "worker_1",
    );

    assert!(worker.claim_and_process_one().expect("process write"));

    let updated = store.get(&GitHubWriteId::new("ghw_rl")).expect("load write");
    assert_eq!(
        updated.status,
        GitHubWriteStatus::Processing,
        "a rate-limited attempt never reached github, so the write itself does not transition"
    );

    let reclaimed = store.claim(Queue::Outbox, "worker_2", 30_000).expect("claim");
    assert!(reclaimed.is_none(), "job was re-queued for a future retry_at, not immediately claimable");
}

#[test]
fn ambiguous_write_recovers_to_sent_when_marker_is_found() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    let write = GitHubWrite { status: GitHubWriteStatus::Ambiguous, ..sample_write("ghw_amb", GitHubWriteKind::CreatePr) };
    store.enqueue_write(write).expect("enqueue write");

    let github = Arc::new(FakeGitHubClient::new(vec![]));
    github.seed_marker(
        r#"{"github_write_id":"ghw_amb","payload_hash":"hash_1"}"#,
        GitHubWriteResponse {
            github_id: "PR_recovered".to_string(),
            github_number: Some(9),
            github_url: "https://github.com/acme/widgets/pull/9".to_string(),
        },
    );

    let outbox_store = store.clone() as Arc<dyn OutboxStore>;
    let github_client = github as Arc<dyn conductor_providers::GitHubClient>;
    let resolved = recover_ambiguous_writes(&outbox_store, &github_client).expect("recovery sweep");
    assert_eq!(resolved, 1);

    let recovered = store.get(&GitHubWriteId::new("ghw_amb")).expect("load write");
    assert_eq!(recovered.status, GitHubWriteStatus::Sent);
    assert_eq!(recovered.github_number, Some(9));
}

#[test]
fn ambiguous_write_requeues_when_no_marker_is_found() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    let write = GitHubWrite { status: GitHubWriteStatus::Ambiguous, ..sample_write("ghw_amb_empty", GitHubWriteKind::CreatePr) };
    store.enqueue_write(write).expect("enqueue write");

    let github = Arc::new(FakeGitHubClient::new(vec![]));
    let outbox_store = store.clone() as Arc<dyn OutboxStore>;
    let github_client = github as Arc<dyn conductor_providers::GitHubClient>;
    let resolved = recover_ambiguous_writes(&outbox_store, &github_client).expect("recovery sweep");
    assert_eq!(resolved, 1);

    let requeued = store.get(&GitHubWriteId::new("ghw_amb_empty")).expect("load write");
    assert_eq!(requeued.status, GitHubWriteStatus::Queued, "an empty scan is only ever safe to retry from queued");
}

#[test]
fn request_review_writes_are_never_eligible_for_marker_recovery() {
    let store = fresh_store();
    store.insert_run(&sample_run()).expect("insert run");
    let write = GitHubWrite {
        status: GitHubWriteStatus::Ambiguous,
        ..sample_write("ghw_review", GitHubWriteKind::RequestReview)
    };
    store.enqueue_write(write).expect("enqueue write");

    let github = Arc::new(FakeGitHubClient::new(vec![]));
    let outbox_store = store.clone() as Arc<dyn OutboxStore>;
    let github_client = github as Arc<dyn conductor_providers::GitHubClient>;
    let resolved = recover_ambiguous_writes(&outbox_store, &github_client).expect("recovery sweep");
    assert_eq!(resolved, 0, "request_review carries no marker, so it cannot be resolved by this scan");

    let untouched = store.get(&GitHubWriteId::new("ghw_review")).expect("load write");
    assert_eq!(untouched.status, GitHubWriteStatus::Ambiguous);
}
