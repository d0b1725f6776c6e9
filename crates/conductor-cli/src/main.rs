// crates/conductor-cli/src/main.rs
// ============================================================================
// Module: Conductor CLI Entry Point
// Description: The operator control surface (§6.3) as a local command
//              dispatcher, plus `serve` which boots the full orchestrator
//              process topology (§2).
// Purpose: Give an operator a thin, auditable way to drive a run through
//          its ten named actions without going through the web UI/API
//          (§1 Non-goals: "the web front-end presentation" is out of
//          scope, not the actions themselves).
// Dependencies: clap, conductor-config, conductor-core, conductor-providers,
//              conductor-store-sqlite, conductor-worker, tokio
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use conductor_core::ids::ProjectId;
use conductor_core::ids::RepoId;
use conductor_core::ids::RunId;
use conductor_core::ids::TaskId;
use conductor_core::interfaces::CredentialError;
use conductor_core::interfaces::CredentialProvider;
use conductor_core::interfaces::ScopedCredential;
use conductor_core::policy::Override;
use conductor_core::policy::OverrideConstraint;
use conductor_core::policy::OverrideScope;
use conductor_core::run::IterationCounters;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;
use conductor_core::time::Timestamp;
use conductor_providers::GitHubClient;
use conductor_providers::HttpGitHubClient;
use conductor_providers::HttpGitHubClientConfig;
use conductor_store_sqlite::SqliteStore;
use conductor_store_sqlite::SqliteStoreConfig;
use conductor_worker::ConductorContext;
use conductor_worker::SupervisorConfig;
use conductor_worker::actions::ActionRequest;
use conductor_worker::actions::OperatorAction;
use conductor_worker::actions::execute_action;
use conductor_worker::agent::AgentInvocationRequest;
use conductor_worker::agent::AgentInvocationOutcome;
use conductor_worker::agent::AgentRuntime;
use conductor_worker::agent::AgentRuntimeError;
use conductor_worker::router::build_router;
use conductor_worker::spawn_background_loops;
use ulid::Ulid;

/// Conductor's operator CLI.
#[derive(Debug, Parser)]
#[command(name = "conductor", about = "Operator control surface for Conductor runs", version)]
struct Cli {
    /// Path to `conductor.toml`. Missing file falls back to defaults plus
    /// `CONDUCTOR_<SECTION>_<KEY>` environment overrides.
    #[arg(long, global = true, default_value = "conductor.toml")]
    config: PathBuf,

    /// Which operation to run.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Boots the orchestrator process: HTTP webhook/control surface, the
    /// per-run drain loop, job-queue workers, and the janitor sweep.
    Serve,
    /// Creates a new run in `pending` phase for an operator to `start-run`.
    CreateRun(CreateRunArgs),
    /// Prints a run's current projection as JSON.
    GetRun(RunTarget),
    /// Dispatches a pending run into planning (`pending` -> `planning`).
    StartRun(ActionArgs),
    /// Accepts the plan and moves the run into execution.
    ApprovePlan(ActionArgs),
    /// Sends the run back to planning for another pass.
    RevisePlan(ActionArgs),
    /// Rejects the plan and cancels the run.
    RejectAndCancel(ActionArgs),
    /// Resumes a blocked run from its most recent valid checkpoint.
    Retry(ActionArgs),
    /// Cancels a non-terminal run outright.
    Cancel(ActionArgs),
    /// Pauses a healthy run without changing its phase.
    Pause(ActionArgs),
    /// Resumes a paused run.
    Resume(ActionArgs),
    /// Grants a policy override and retries a policy-blocked run.
    GrantPolicyException(GrantPolicyExceptionArgs),
    /// Denies a policy exception request and cancels the run.
    DenyPolicyException(ActionArgs),
}

/// The run an action or query targets.
#[derive(Debug, Args)]
struct RunTarget {
    /// The run id.
    run_id: String,
}

/// Arguments shared by every operator action (§6.3 "stamped with
/// `actor_type`, `actor_display_name`").
#[derive(Debug, Args)]
struct ActionArgs {
    /// The run id to act on.
    run_id: String,
    /// The acting user's id, stamped into the idempotency key and the
    /// event payload.
    #[arg(long)]
    actor_user_id: String,
    /// The acting user's display name.
    #[arg(long)]
    actor_display_name: String,
    /// Optional free-text comment attached to the action.
    #[arg(long)]
    comment: Option<String>,
    /// Idempotency nonce. Reuse the same value to make a retried click a
    /// no-op rather than a second action; defaults to a fresh ULID per
    /// invocation.
    #[arg(long)]
    client_nonce: Option<String>,
}

/// Arguments for `grant-policy-exception`, which also records the
/// [`Override`] the action resolves against.
#[derive(Debug, Args)]
struct GrantPolicyExceptionArgs {
    /// The shared action arguments (run, actor, comment, nonce).
    #[command(flatten)]
    action: ActionArgs,
    /// The policy violation this override addresses.
    #[arg(long)]
    violation_id: String,
    /// How broadly the override applies.
    #[arg(long, value_enum)]
    scope: CliOverrideScope,
    /// The constraint kind narrowing the override.
    #[arg(long, value_enum)]
    constraint_kind: CliConstraintKind,
    /// The constraint value: a content hash for `content-hash`, or a
    /// comma-separated list for the allowlist kinds.
    #[arg(long)]
    constraint_value: String,
    /// RFC 3339 expiry, if the override is time-bounded.
    #[arg(long)]
    expires_at: Option<String>,
}

/// CLI-facing mirror of [`OverrideScope`], matching clap's `ValueEnum`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliOverrideScope {
    /// This run only.
    ThisRun,
    /// Every run of the owning task.
    ThisTask,
    /// Every run in the owning repo.
    ThisRepo,
    /// Project-wide.
    ProjectWide,
}

impl From<CliOverrideScope> for OverrideScope {
    /// Maps the CLI-facing enum to the core domain type.
    fn from(value: CliOverrideScope) -> Self {
        match value {
            CliOverrideScope::ThisRun => OverrideScope::ThisRun,
            CliOverrideScope::ThisTask => OverrideScope::ThisTask,
            CliOverrideScope::ThisRepo => OverrideScope::ThisRepo,
            CliOverrideScope::ProjectWide => OverrideScope::ProjectWide,
        }
    }
}

/// CLI-facing mirror of [`OverrideConstraint`]'s variant names.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliConstraintKind {
    /// `OverrideConstraint::ContentHash`.
    ContentHash,
    /// `OverrideConstraint::AllowedPaths`.
    AllowedPaths,
    /// `OverrideConstraint::AllowedCommands`.
    AllowedCommands,
    /// `OverrideConstraint::AllowedHosts`.
    AllowedHosts,
}

/// Arguments for `create-run`.
#[derive(Debug, Args)]
struct CreateRunArgs {
    /// The task this run attempts.
    #[arg(long)]
    task_id: String,
    /// The owning project.
    #[arg(long)]
    project_id: String,
    /// The owning repo.
    #[arg(long)]
    repo_id: String,
    /// The branch the run's branch will be cut from.
    #[arg(long, default_value = "main")]
    base_branch: String,
    /// Sequential run number within the owning task. The caller is
    /// responsible for picking the next number (§3 "run_number (sequential
    /// per task)"); this CLI does not scan prior runs for you.
    #[arg(long, default_value_t = 1)]
    run_number: i64,
}

/// Parses arguments, dispatches the chosen subcommand, and maps any
/// [`CliError`] to a non-zero process exit.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            #[allow(clippy::print_stderr, reason = "operator-facing CLI error output")]
            {
                eprintln!("error: {err}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration and routes to the handler for `cli.command`.
async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::CreateRun(args) => create_run(&config, args),
        Command::GetRun(target) => get_run(&config, target),
        Command::StartRun(args) => apply_action(&config, OperatorAction::StartRun, args, None),
        Command::ApprovePlan(args) => apply_action(&config, OperatorAction::ApprovePlan, args, None),
        Command::RevisePlan(args) => apply_action(&config, OperatorAction::RevisePlan, args, None),
        Command::RejectAndCancel(args) => apply_action(&config, OperatorAction::RejectAndCancel, args, None),
        Command::Retry(args) => apply_action(&config, OperatorAction::Retry, args, None),
        Command::Cancel(args) => apply_action(&config, OperatorAction::Cancel, args, None),
        Command::Pause(args) => apply_action(&config, OperatorAction::Pause, args, None),
        Command::Resume(args) => apply_action(&config, OperatorAction::Resume, args, None),
        Command::GrantPolicyException(args) => grant_policy_exception(&config, args),
        Command::DenyPolicyException(args) => apply_action(&config, OperatorAction::DenyPolicyException, args, None),
    }
}

// ============================================================================
// SECTION: Config Loading
// ============================================================================

/// Loads `conductor.toml` from `path` if it exists, otherwise starts from
/// an empty document (every section carries `#[serde(default)]`), then
/// applies `CONDUCTOR_<SECTION>_<KEY>` environment overrides (§6.4
/// "Configuration loading").
fn load_config(path: &PathBuf) -> Result<conductor_config::ConductorConfig, CliError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(CliError::ConfigIo(path.display().to_string(), err.to_string())),
    };
    conductor_config::load_from_toml_with_env(&text, std::env::vars()).map_err(CliError::Config)
}

// ============================================================================
// SECTION: Store / Context Construction
// ============================================================================

/// Opens the `SQLite` store named by `config.storage.sqlite_path`.
fn open_store(config: &conductor_config::ConductorConfig) -> Result<SqliteStore, CliError> {
    let sqlite_config = SqliteStoreConfig { path: PathBuf::from(&config.storage.sqlite_path), ..SqliteStoreConfig::in_memory() };
    SqliteStore::open(&sqlite_config).map_err(CliError::Store)
}

/// Builds the shared GitHub client from environment-resolved credentials.
/// `CONDUCTOR_GITHUB_API_BASE_URL` overrides the default API host (pointed
/// at a fixture server in tests).
fn build_github_client() -> Result<Arc<dyn GitHubClient>, CliError> {
    let mut gh_config = HttpGitHubClientConfig::default();
    if let Ok(base_url) = std::env::var("CONDUCTOR_GITHUB_API_BASE_URL") {
        gh_config.api_base_url = base_url;
    }
    let client = HttpGitHubClient::new(gh_config).map_err(|err| CliError::GitHubClient(err.to_string()))?;
    Ok(Arc::new(client))
}

// ============================================================================
// SECTION: `serve`
// ============================================================================

async fn serve(config: conductor_config::ConductorConfig) -> Result<(), CliError> {
    let sqlite_config =
        SqliteStoreConfig { path: PathBuf::from(&config.storage.sqlite_path), ..SqliteStoreConfig::in_memory() };
    let github = build_github_client()?;
    let credentials = Arc::new(EnvCredentialProvider);
    let worker_id = format!("conductor-{}", Ulid::new());

    let ctx = ConductorContext::open(&sqlite_config, config.clone(), github, credentials, worker_id)
        .map_err(CliError::Store)?;

    let background = spawn_background_loops(
        ctx.clone(),
        Arc::new(UnconfiguredAgentRuntime),
        SupervisorConfig {
            drain_concurrency: config.http.drain_concurrency,
            janitor_interval: std::time::Duration::from_secs(config.http.janitor_interval_seconds),
            idle_poll_interval: std::time::Duration::from_millis(200),
        },
    );

    let router = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
        .await
        .map_err(|err| CliError::Bind(config.http.bind_address.clone(), err.to_string()))?;

    tracing::info!(bind_address = %config.http.bind_address, "conductor serve: listening");

    let serve_result = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await;

    background.abort_all();
    background.join_all().await;
    serve_result.map_err(|err| CliError::Serve(err.to_string()))
}

/// Waits for `SIGTERM` (or, on unsupported platforms, `Ctrl+C`) so `serve`
/// can release its listener and let the background loops wind down
/// (§9 "Lifecycle: init at process start, teardown on SIGTERM").
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// No AI provider is configured by default (§1 Non-goals: "the internal
/// prompt engineering of agents"). A real deployment supplies its own
/// [`AgentRuntime`] to [`spawn_background_loops`]; this placeholder only
/// lets `serve` boot without one, reporting every invocation as a
/// transport failure so the agent job retries/backs off rather than
/// silently completing.
struct UnconfiguredAgentRuntime;

impl AgentRuntime for UnconfiguredAgentRuntime {
    /// Always fails: no agent provider is wired up by default.
    fn invoke(&self, request: &AgentInvocationRequest) -> Result<AgentInvocationOutcome, AgentRuntimeError> {
        Err(AgentRuntimeError::Provider(format!(
            "no AgentRuntime configured for step {:?} on run {}; replace UnconfiguredAgentRuntime in conductor-cli::main::serve",
            request.step, request.run_id
        )))
    }
}

/// Resolves GitHub credentials from the process environment: `webhook_secret`
/// reads `CONDUCTOR_WEBHOOK_SECRET_<PROJECT>`, every other step reads
/// `CONDUCTOR_GH_TOKEN_<PROJECT>` (§5 "External credentials"). A production
/// deployment replaces this with a real GitHub App installation-token
/// exchange behind the same trait.
struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    /// Reads the per-project, per-step token or secret from the process
    /// environment.
    fn resolve(&self, project_id: &ProjectId, step: &str) -> Result<ScopedCredential, CredentialError> {
        let suffix = project_id.as_str().to_uppercase().replace(['-', '.'], "_");
        let var = if step == "webhook_secret" { format!("CONDUCTOR_WEBHOOK_SECRET_{suffix}") } else { format!("CONDUCTOR_GH_TOKEN_{suffix}") };
        let token = std::env::var(&var).map_err(|_| CredentialError::Unavailable(var))?;
        // Environment-sourced tokens carry no expiry of their own; treat
        // them as valid for a day so `InstallationTokenCache` callers don't
        // immediately consider them stale.
        Ok(ScopedCredential { token, expires_at: Timestamp::now() })
    }
}

// ============================================================================
// SECTION: `create-run` / `get-run`
// ============================================================================

/// Inserts a fresh `pending` run row and prints it; the operator drives it
/// forward with `start-run`.
fn create_run(config: &conductor_config::ConductorConfig, args: CreateRunArgs) -> Result<(), CliError> {
    let store = open_store(config)?;
    let now = Timestamp::now();
    let run = Run {
        run_id: RunId::new(Ulid::new().to_string()),
        task_id: TaskId::new(args.task_id),
        project_id: ProjectId::new(args.project_id),
        repo_id: RepoId::new(args.repo_id),
        run_number: args.run_number,
        parent_run_id: None,
        supersedes_run_id: None,
        phase: RunPhase::Pending,
        step: RunStep::SetupWorktree,
        next_sequence: 1,
        last_event_sequence: 0,
        paused_at: None,
        paused_by: None,
        blocked_context: None,
        base_branch: args.base_branch,
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
    store.insert_run(&run).map_err(CliError::RunStore)?;
    print_json(&run)
}

/// Prints the current projection of one run, or [`CliError::RunNotFound`].
fn get_run(config: &conductor_config::ConductorConfig, target: RunTarget) -> Result<(), CliError> {
    let store = open_store(config)?;
    let run_id = RunId::new(target.run_id);
    match conductor_core::interfaces::RunStore::get(&store, &run_id).map_err(CliError::RunStore)? {
        Some(run) => print_json(&run),
        None => Err(CliError::RunNotFound(run_id.to_string())),
    }
}

// ============================================================================
// SECTION: Operator Actions
// ============================================================================

/// Opens a local context and dispatches one operator action through
/// [`execute_action`], printing the resulting run or the rejection reason.
fn apply_action(
    config: &conductor_config::ConductorConfig,
    action: OperatorAction,
    args: ActionArgs,
    override_grant: Option<Override>,
) -> Result<(), CliError> {
    let store = Arc::new(open_store(config)?);
    let ctx = local_context(config, store)?;

    let request = ActionRequest {
        run_id: RunId::new(args.run_id),
        action,
        actor_user_id: args.actor_user_id,
        actor_display_name: args.actor_display_name,
        comment: args.comment,
        client_nonce: args.client_nonce.unwrap_or_else(|| Ulid::new().to_string()),
        override_grant,
    };

    let run = execute_action(&ctx, request).map_err(|err| CliError::Action(err.to_string()))?;
    print_json(&run)
}

/// Builds the [`Override`] named by `args` and dispatches
/// `grant_policy_exception` carrying it.
fn grant_policy_exception(config: &conductor_config::ConductorConfig, args: GrantPolicyExceptionArgs) -> Result<(), CliError> {
    let constraint = match args.constraint_kind {
        CliConstraintKind::ContentHash => OverrideConstraint::ContentHash(args.constraint_value),
        CliConstraintKind::AllowedPaths => OverrideConstraint::AllowedPaths(split_csv(&args.constraint_value)),
        CliConstraintKind::AllowedCommands => OverrideConstraint::AllowedCommands(split_csv(&args.constraint_value)),
        CliConstraintKind::AllowedHosts => OverrideConstraint::AllowedHosts(split_csv(&args.constraint_value)),
    };
    let expires_at = args.expires_at.as_deref().map(Timestamp::parse).transpose().map_err(|err| CliError::InvalidTimestamp(err.to_string()))?;

    let grant = Override {
        override_id: conductor_core::ids::OverrideId::new(Ulid::new().to_string()),
        policy_violation_id: conductor_core::ids::PolicyViolationId::new(args.violation_id),
        scope: args.scope.into(),
        constraint,
        granted_by: args.action.actor_user_id.clone(),
        granted_at: Timestamp::now(),
        expires_at,
    };

    apply_action(config, OperatorAction::GrantPolicyException, args.action, Some(grant))
}

/// Splits a comma-separated `--constraint-value` into trimmed, non-empty
/// entries for the allowlist-shaped [`OverrideConstraint`] variants.
fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|segment| !segment.is_empty()).map(str::to_string).collect()
}

/// Builds a [`ConductorContext`] for local, synchronous action dispatch:
/// every storage trait is the same [`SqliteStore`], the GitHub client is
/// only exercised by the outbox worker (not by `apply_action`), and the
/// credential provider is the same environment-backed resolver `serve`
/// uses.
fn local_context(config: &conductor_config::ConductorConfig, store: Arc<SqliteStore>) -> Result<ConductorContext, CliError> {
    let github = build_github_client()?;
    Ok(ConductorContext {
        events: store.clone(),
        runs: store.clone(),
        gates: store.clone(),
        jobs: store.clone(),
        outbox: store.clone(),
        artifacts: store.clone(),
        policies: store.clone(),
        worktrees: store,
        credentials: Arc::new(EnvCredentialProvider),
        github,
        config: Arc::new(config.clone()),
        wake: Arc::new(conductor_worker::RunWakeRegistry::new()),
        worker_id: Arc::from(format!("conductor-cli-{}", Ulid::new())),
    })
}

/// Pretty-prints `value` as JSON on stdout, the CLI's one output format.
fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|err| CliError::Serialize(err.to_string()))?;
    #[allow(clippy::print_stdout, reason = "operator-facing CLI result output")]
    {
        println!("{text}");
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Every error this CLI can surface, each with a `Display` the operator can
/// read directly off the terminal.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// `conductor.toml` exists but could not be read.
    #[error("failed to read config file {0}: {1}")]
    ConfigIo(String, String),
    /// Config parsing, override application, or validation failed.
    #[error(transparent)]
    Config(#[from] conductor_config::ConfigError),
    /// The `SQLite` store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] conductor_store_sqlite::SqliteStoreError),
    /// A run-store operation failed (CAS conflict, not found, or I/O).
    #[error("run store error: {0}")]
    RunStore(#[from] conductor_core::interfaces::RunStoreError),
    /// The GitHub client could not be constructed.
    #[error("github client error: {0}")]
    GitHubClient(String),
    /// The axum listener could not bind.
    #[error("failed to bind {0}: {1}")]
    Bind(String, String),
    /// The axum server loop returned an error.
    #[error("serve error: {0}")]
    Serve(String),
    /// The requested run does not exist.
    #[error("run not found: {0}")]
    RunNotFound(String),
    /// An operator action was rejected.
    #[error("{0}")]
    Action(String),
    /// An `--expires-at` value was not valid RFC 3339.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// A value could not be serialized to JSON for printing.
    #[error("failed to serialize output: {0}")]
    Serialize(String),
}
