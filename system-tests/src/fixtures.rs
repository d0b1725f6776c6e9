// system-tests/src/fixtures.rs
// ============================================================================
// Module: Scenario Fixtures
// Description: Assembles an in-process `ConductorContext` over an in-memory
//              store, a scriptable `FakeGitHubClient`, and a fixed webhook
//              secret, plus the `Run` seeding scenarios build on.
// Dependencies: conductor-core, conductor-providers, conductor-store-sqlite,
//               conductor-worker
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use conductor_config::ConductorConfig;
use conductor_core::ids::ProjectId;
use conductor_core::ids::RepoId;
use conductor_core::ids::RunId;
use conductor_core::ids::TaskId;
use conductor_core::run::IterationCounters;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;
use conductor_core::time::Timestamp;
use conductor_providers::FakeGitHubClient;
use conductor_providers::GitHubClient;
use conductor_providers::StaticCredentialProvider;
use conductor_store_sqlite::SqliteStore;
use conductor_store_sqlite::SqliteStoreConfig;
use conductor_worker::ConductorContext;
use conductor_worker::RunWakeRegistry;

/// The project id every scenario's webhook/credential fixtures share.
pub const PROJECT_ID: &str = "proj_acme_widgets";
/// The shared secret `webhook_secret` resolves to for [`PROJECT_ID`].
pub const WEBHOOK_SECRET: &str = "wh_secret_for_scenarios";

/// A scenario's wired context plus the concrete store backing it, so
/// scenarios can seed rows the public traits don't expose an insert path
/// for (`insert_run` is inherent on [`SqliteStore`], not part of `RunStore`).
pub struct Scenario {
    /// The context the router/worker code under test is driven through.
    pub ctx: ConductorContext,
    /// The same store `ctx`'s trait fields are backed by.
    pub store: Arc<SqliteStore>,
}

/// Builds a fully wired context over a fresh in-memory database. The GitHub
/// client replays `github`'s scripted responses in call order; the
/// credential provider resolves [`PROJECT_ID`] to [`WEBHOOK_SECRET`] for
/// every step name, matching how `EnvCredentialProvider` resolves one token
/// per project regardless of step.
///
/// # Panics
/// Panics if the in-memory store cannot be opened — a fixture setup failure,
/// never a condition a scenario is expected to assert on.
#[must_use]
pub fn test_context(github: Arc<FakeGitHubClient>) -> Scenario {
    let mut tokens = HashMap::new();
    tokens.insert(
        PROJECT_ID.to_string(),
        (WEBHOOK_SECRET.to_string(), Timestamp::parse("2099-01-01T00:00:00Z").expect("valid")),
    );
    let credentials = Arc::new(StaticCredentialProvider::new(tokens));
    let store = Arc::new(SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open in-memory store"));

    let ctx = ConductorContext {
        events: store.clone(),
        runs: store.clone(),
        gates: store.clone(),
        jobs: store.clone(),
        outbox: store.clone(),
        artifacts: store.clone(),
        policies: store.clone(),
        worktrees: store.clone(),
        credentials,
        github: github as Arc<dyn GitHubClient>,
        config: Arc::new(ConductorConfig::default()),
        wake: Arc::new(RunWakeRegistry::new()),
        worker_id: Arc::from("system-tests-worker"),
    };
    Scenario { ctx, store }
}

/// Inserts a run in `Pending`/`SetupWorktree`, the state `start_run` expects.
///
/// # Panics
/// Panics if the insert fails — scenario setup, not an assertion.
pub fn seed_pending_run(scenario: &Scenario, run_id: &str) -> Run {
    let now = Timestamp::now();
    let run = Run {
        run_id: RunId::new(run_id),
        task_id: TaskId::new("task_1"),
        project_id: ProjectId::new(PROJECT_ID),
        repo_id: RepoId::new("repo_1"),
        run_number: 1,
        parent_run_id: None,
        supersedes_run_id: None,
        phase: RunPhase::Pending,
        step: RunStep::SetupWorktree,
        next_sequence: 1,
        last_event_sequence: 0,
        paused_at: None,
        paused_by: None,
        blocked_context: None,
        base_branch: "main".into(),
        branch: None,
        head_sha: None,
        pr_bundle: None,
        iterations: IterationCounters::default(),
        result: None,
        result_reason: None,
        checkpoints: Vec::new(),
        artifact_ids: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    scenario.store.insert_run(&run).expect("insert run");
    run
}
