// crates/conductor-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: SQLite-backed implementation of every storage trait in
//              conductor_core::interfaces (§6.1 relational contract).
// Purpose: Give the orchestrator, workers, and sandbox a durable, crash-safe
//          backing store without any of them depending on SQLite directly.
// Dependencies: conductor-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One [`SqliteStore`] per process, wrapping a single connection behind a
//! mutex. `SQLite` gives us real transactions and `UNIQUE`/`CHECK`
//! constraints as the backstop the spec calls for (§4.1 "The DB enforces
//! `UNIQUE(run_id, sequence)` as a backstop"); the mutex plays the role of
//! the per-run advisory lock described in §4.4 "Scheduling model" — a
//! single embedded connection has no real concurrent writers to arbitrate
//! between, so one process-wide critical section is sufficient and keeps
//! every multi-statement operation trivially atomic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use conductor_core::artifact::Artifact;
use conductor_core::artifact::ArtifactKind;
use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::gate::GateEvaluation;
use conductor_core::gate::GateStatus;
use conductor_core::gate::RoutingDecision;
use conductor_core::ids::ArtifactId;
use conductor_core::ids::CausationId;
use conductor_core::ids::CorrelationId;
use conductor_core::ids::EventId;
use conductor_core::ids::GateEvalId;
use conductor_core::ids::GateId;
use conductor_core::ids::GitHubWriteId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::JobId;
use conductor_core::ids::OverrideId;
use conductor_core::ids::PolicySetId;
use conductor_core::ids::PolicyViolationId;
use conductor_core::ids::PortLeaseId;
use conductor_core::ids::ProjectId;
use conductor_core::ids::RunId;
use conductor_core::ids::TxnId;
use conductor_core::ids::WorktreeId;
use conductor_core::interfaces::ArtifactStore;
use conductor_core::interfaces::ArtifactStoreError;
use conductor_core::interfaces::EventStore;
use conductor_core::interfaces::EventStoreError;
use conductor_core::interfaces::FailureDisposition;
use conductor_core::interfaces::GateStore;
use conductor_core::interfaces::GateStoreError;
use conductor_core::interfaces::JobStore;
use conductor_core::interfaces::JobStoreError;
use conductor_core::interfaces::OutboxStore;
use conductor_core::interfaces::OutboxStoreError;
use conductor_core::interfaces::PolicyStore;
use conductor_core::interfaces::PolicyStoreError;
use conductor_core::interfaces::RunStore;
use conductor_core::interfaces::RunStoreError;
use conductor_core::interfaces::WorktreeStore;
use conductor_core::interfaces::WorktreeStoreError;
use conductor_core::job::Job;
use conductor_core::job::JobStatus;
use conductor_core::job::Queue;
use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteKind;
use conductor_core::outbox::GitHubWriteStatus;
use conductor_core::policy::Override;
use conductor_core::policy::OverrideConstraint;
use conductor_core::policy::OverrideScope;
use conductor_core::policy::PolicySet;
use conductor_core::policy::PolicySetEntry;
use conductor_core::policy::PolicyViolation;
use conductor_core::run::BlockedContext;
use conductor_core::run::Checkpoint;
use conductor_core::run::IterationCounters;
use conductor_core::run::PrBundle;
use conductor_core::run::Run;
use conductor_core::run::RunPhase;
use conductor_core::run::RunStep;
use conductor_core::time::Timestamp;
use conductor_core::worktree::PortLease;
use conductor_core::worktree::Worktree;
use conductor_core::worktree::WorktreeStatus;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended; concurrent readers, serialized writer).
    #[default]
    Wal,
    /// Delete journal mode (legacy; used by some in-process test setups).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` synchronous mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest; survives OS crash, not just process crash).
    #[default]
    Full,
    /// Normal synchronous mode (balanced; default pairing with WAL).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Default `SQLite` busy timeout, matching the teacher's durability defaults.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for the `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file. `:memory:` is accepted for tests.
    pub path: PathBuf,
    /// Journal mode.
    #[serde(default)]
    pub mode: SqliteStoreMode,
    /// Synchronous mode.
    #[serde(default)]
    pub sync: SqliteSyncMode,
    /// Busy timeout in milliseconds before a lock-contended statement errors.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl SqliteStoreConfig {
    /// Convenience constructor for an in-memory store, used by tests and by
    /// crates exercising the store without a file on disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            mode: SqliteStoreMode::Delete,
            sync: SqliteSyncMode::Full,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Top-level `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Underlying `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON (de)serialization failure reading/writing a row.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored row failed to decode into its domain type (corruption or a
    /// schema/model drift bug).
    #[error("corrupt row in {table}: {detail}")]
    CorruptRow {
        /// Table the malformed row was read from.
        table: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

fn io_err<E: std::fmt::Display>(err: E) -> String {
    err.to_string()
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// The `SQLite`-backed store. Implements every storage trait in
/// `conductor_core::interfaces`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `config.path`, applies
    /// pragmas, and runs any pending migrations.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError::Sqlite`] if the file cannot be opened or
    /// a migration fails.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let mut conn = Connection::open(&config.path)?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "journal_mode", config.mode.pragma_value())?;
        conn.pragma_update(None, "synchronous", config.sync.pragma_value())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::schema::run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Returns the current time as an RFC 3339 string, for migration bookkeeping.
#[must_use]
pub fn now_rfc3339() -> String {
    Timestamp::now().to_rfc3339()
}

/// Returns the current unix time in milliseconds, for diagnostics that want
/// a wall-clock stamp outside of [`Timestamp`].
#[must_use]
pub fn unix_millis_now() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

// ============================================================================
// SECTION: Phase / Step / Status string mapping
// ============================================================================

fn phase_to_str(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Pending => "pending",
        RunPhase::Planning => "planning",
        RunPhase::AwaitingPlanApproval => "awaiting_plan_approval",
        RunPhase::Executing => "executing",
        RunPhase::AwaitingReview => "awaiting_review",
        RunPhase::Blocked => "blocked",
        RunPhase::Completed => "completed",
        RunPhase::Cancelled => "cancelled",
    }
}

fn phase_from_str(value: &str) -> Result<RunPhase, SqliteStoreError> {
    Ok(match value {
        "pending" => RunPhase::Pending,
        "planning" => RunPhase::Planning,
        "awaiting_plan_approval" => RunPhase::AwaitingPlanApproval,
        "executing" => RunPhase::Executing,
        "awaiting_review" => RunPhase::AwaitingReview,
        "blocked" => RunPhase::Blocked,
        "completed" => RunPhase::Completed,
        "cancelled" => RunPhase::Cancelled,
        other => {
            return Err(SqliteStoreError::CorruptRow { table: "runs", detail: format!("unknown phase {other}") });
        }
    })
}

fn step_to_str(step: RunStep) -> &'static str {
    match step {
        RunStep::SetupWorktree => "setup_worktree",
        RunStep::PlannerCreatePlan => "planner_create_plan",
        RunStep::ReviewerReviewPlan => "reviewer_review_plan",
        RunStep::WaitPlanApproval => "wait_plan_approval",
        RunStep::ImplementerApplyChanges => "implementer_apply_changes",
        RunStep::TesterRunTests => "tester_run_tests",
        RunStep::ReviewerReviewCode => "reviewer_review_code",
        RunStep::CreatePr => "create_pr",
        RunStep::WaitPrMerge => "wait_pr_merge",
        RunStep::Cleanup => "cleanup",
    }
}

fn step_from_str(value: &str) -> Result<RunStep, SqliteStoreError> {
    Ok(match value {
        "setup_worktree" => RunStep::SetupWorktree,
        "planner_create_plan" => RunStep::PlannerCreatePlan,
        "reviewer_review_plan" => RunStep::ReviewerReviewPlan,
        "wait_plan_approval" => RunStep::WaitPlanApproval,
        "implementer_apply_changes" => RunStep::ImplementerApplyChanges,
        "tester_run_tests" => RunStep::TesterRunTests,
        "reviewer_review_code" => RunStep::ReviewerReviewCode,
        "create_pr" => RunStep::CreatePr,
        "wait_pr_merge" => RunStep::WaitPrMerge,
        "cleanup" => RunStep::Cleanup,
        other => return Err(SqliteStoreError::CorruptRow { table: "runs", detail: format!("unknown step {other}") }),
    })
}

fn ts_opt(value: Option<&str>) -> Result<Option<Timestamp>, SqliteStoreError> {
    value
        .map(|raw| {
            Timestamp::parse(raw)
                .map_err(|err| SqliteStoreError::CorruptRow { table: "runs", detail: format!("bad timestamp {raw}: {err}") })
        })
        .transpose()
}

#[derive(Serialize, Deserialize)]
struct BlockedContextRow {
    prior_phase: Option<String>,
    prior_step: Option<String>,
    diagnostics: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct CheckpointRow {
    kind: String,
    evidence: serde_json::Value,
    anchor: Option<String>,
    recorded_at: String,
}

impl CheckpointRow {
    fn from_domain(checkpoint: &Checkpoint) -> Self {
        let kind = match checkpoint.kind {
            conductor_core::run::CheckpointKind::EnvironmentReady => "environment_ready",
            conductor_core::run::CheckpointKind::PlanningComplete => "planning_complete",
            conductor_core::run::CheckpointKind::PlanApproved => "plan_approved",
            conductor_core::run::CheckpointKind::ImplementationComplete => "implementation_complete",
            conductor_core::run::CheckpointKind::TestsPassed => "tests_passed",
            conductor_core::run::CheckpointKind::PrCreated => "pr_created",
        };
        Self {
            kind: kind.to_string(),
            evidence: checkpoint.evidence.clone(),
            anchor: checkpoint.anchor.clone(),
            recorded_at: checkpoint.recorded_at.to_rfc3339(),
        }
    }

    fn into_domain(self) -> Result<Checkpoint, SqliteStoreError> {
        let kind = match self.kind.as_str() {
            "environment_ready" => conductor_core::run::CheckpointKind::EnvironmentReady,
            "planning_complete" => conductor_core::run::CheckpointKind::PlanningComplete,
            "plan_approved" => conductor_core::run::CheckpointKind::PlanApproved,
            "implementation_complete" => conductor_core::run::CheckpointKind::ImplementationComplete,
            "tests_passed" => conductor_core::run::CheckpointKind::TestsPassed,
            "pr_created" => conductor_core::run::CheckpointKind::PrCreated,
            other => {
                return Err(SqliteStoreError::CorruptRow { table: "runs", detail: format!("bad checkpoint {other}") });
            }
        };
        Ok(Checkpoint {
            kind,
            evidence: self.evidence,
            anchor: self.anchor,
            recorded_at: Timestamp::parse(&self.recorded_at)
                .map_err(|e| SqliteStoreError::CorruptRow { table: "runs", detail: e.to_string() })?,
        })
    }
}

fn result_to_str(result: conductor_core::run::RunResult) -> &'static str {
    match result {
        conductor_core::run::RunResult::Success => "success",
        conductor_core::run::RunResult::Failure => "failure",
        conductor_core::run::RunResult::Cancelled => "cancelled",
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Run, SqliteStoreError>> {
    let build = || -> Result<Run, SqliteStoreError> {
        let phase: String = row.get("phase")?;
        let step: String = row.get("step")?;
        let blocked_reason: Option<String> = row.get("blocked_reason")?;
        let blocked_context_json: Option<String> = row.get("blocked_context_json")?;
        let checkpoints_json: String = row.get("checkpoints_json")?;
        let pr_number: Option<i64> = row.get("pr_number")?;

        let blocked_context = match (blocked_reason, blocked_context_json) {
            (Some(reason), Some(raw)) => {
                let parsed: BlockedContextRow = serde_json::from_str(&raw)?;
                Some(BlockedContext {
                    reason,
                    prior_phase: parsed.prior_phase.map(|p| phase_from_str(&p)).transpose()?,
                    prior_step: parsed.prior_step.map(|s| step_from_str(&s)).transpose()?,
                    diagnostics: parsed.diagnostics,
                })
            }
            _ => None,
        };

        let pr_bundle = if let Some(pr_number) = pr_number {
            Some(PrBundle {
                pr_number,
                pr_node_id: row.get::<_, Option<String>>("pr_node_id")?.unwrap_or_default(),
                pr_url: row.get::<_, Option<String>>("pr_url")?.unwrap_or_default(),
                pr_state: row.get::<_, Option<String>>("pr_state")?.unwrap_or_default(),
                pr_synced_at: ts_opt(row.get::<_, Option<String>>("pr_synced_at")?.as_deref())?.ok_or_else(|| {
                    SqliteStoreError::CorruptRow { table: "runs", detail: "pr bundle missing pr_synced_at".into() }
                })?,
            })
        } else {
            None
        };

        let checkpoints: Vec<CheckpointRow> = serde_json::from_str(&checkpoints_json)?;
        let checkpoints = checkpoints.into_iter().map(CheckpointRow::into_domain).collect::<Result<Vec<_>, _>>()?;

        let result: Option<String> = row.get("result")?;

        Ok(Run {
            run_id: RunId::new(row.get::<_, String>("run_id")?),
            task_id: conductor_core::ids::TaskId::new(row.get::<_, String>("task_id")?),
            project_id: ProjectId::new(row.get::<_, String>("project_id")?),
            repo_id: conductor_core::ids::RepoId::new(row.get::<_, String>("repo_id")?),
            run_number: row.get("run_number")?,
            parent_run_id: row.get::<_, Option<String>>("parent_run_id")?.map(RunId::new),
            supersedes_run_id: row.get::<_, Option<String>>("supersedes_run_id")?.map(RunId::new),
            phase: phase_from_str(&phase)?,
            step: step_from_str(&step)?,
            next_sequence: row.get("next_sequence")?,
            last_event_sequence: row.get("last_event_sequence")?,
            paused_at: ts_opt(row.get::<_, Option<String>>("paused_at")?.as_deref())?,
            paused_by: row.get("paused_by")?,
            blocked_context,
            base_branch: row.get("base_branch")?,
            branch: row.get("branch")?,
            head_sha: row.get("head_sha")?,
            pr_bundle,
            iterations: IterationCounters {
                plan_revisions: row.get("plan_revisions")?,
                test_fix_attempts: row.get("test_fix_attempts")?,
                review_rounds: row.get("review_rounds")?,
            },
            result: result
                .map(|r| match r.as_str() {
                    "success" => Ok(conductor_core::run::RunResult::Success),
                    "failure" => Ok(conductor_core::run::RunResult::Failure),
                    "cancelled" => Ok(conductor_core::run::RunResult::Cancelled),
                    other => Err(SqliteStoreError::CorruptRow { table: "runs", detail: format!("bad result {other}") }),
                })
                .transpose()?,
            result_reason: row.get("result_reason")?,
            checkpoints,
            artifact_ids: Vec::new(),
            created_at: Timestamp::parse(&row.get::<_, String>("created_at")?)
                .map_err(|e| SqliteStoreError::CorruptRow { table: "runs", detail: e.to_string() })?,
            updated_at: Timestamp::parse(&row.get::<_, String>("updated_at")?)
                .map_err(|e| SqliteStoreError::CorruptRow { table: "runs", detail: e.to_string() })?,
        })
    };
    Ok(build())
}

// ============================================================================
// SECTION: EventStore
// ============================================================================

fn class_to_str(class: EventClass) -> &'static str {
    match class {
        EventClass::Fact => "fact",
        EventClass::Decision => "decision",
        EventClass::Signal => "signal",
    }
}

fn class_from_str(value: &str) -> Option<EventClass> {
    match value {
        "fact" => Some(EventClass::Fact),
        "decision" => Some(EventClass::Decision),
        "signal" => Some(EventClass::Signal),
        _ => None,
    }
}

fn source_to_str(source: EventSource) -> &'static str {
    match source {
        EventSource::GithubWebhook => "github_webhook",
        EventSource::UiAction => "ui_action",
        EventSource::Scheduler => "scheduler",
        EventSource::AgentRuntime => "agent_runtime",
        EventSource::System => "system",
    }
}

fn source_from_str(value: &str) -> Option<EventSource> {
    match value {
        "github_webhook" => Some(EventSource::GithubWebhook),
        "ui_action" => Some(EventSource::UiAction),
        "scheduler" => Some(EventSource::Scheduler),
        "agent_runtime" => Some(EventSource::AgentRuntime),
        "system" => Some(EventSource::System),
        _ => None,
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let class: String = row.get("class")?;
    let source: String = row.get("source")?;
    let payload_json: String = row.get("payload_json")?;
    Ok(Event {
        event_id: EventId::new(row.get::<_, String>("event_id")?),
        project_id: ProjectId::new(row.get::<_, String>("project_id")?),
        run_id: row.get::<_, Option<String>>("run_id")?.map(RunId::new),
        task_id: row.get::<_, Option<String>>("task_id")?.map(conductor_core::ids::TaskId::new),
        repo_id: row.get::<_, Option<String>>("repo_id")?.map(conductor_core::ids::RepoId::new),
        event_type: row.get("event_type")?,
        class: class_from_str(&class).unwrap_or(EventClass::Fact),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        sequence: row.get("sequence")?,
        idempotency_key: IdempotencyKey::new(row.get::<_, String>("idempotency_key")?),
        causation_id: row.get::<_, Option<String>>("causation_id")?.map(CausationId::new),
        correlation_id: row.get::<_, Option<String>>("correlation_id")?.map(CorrelationId::new),
        txn_id: row.get::<_, Option<String>>("txn_id")?.map(TxnId::new),
        source: source_from_str(&source).unwrap_or(EventSource::System),
        created_at: Timestamp::parse(&row.get::<_, String>("created_at")?).unwrap_or_else(|_| Timestamp::now()),
        processed_at: row.get::<_, Option<String>>("processed_at")?.and_then(|raw| Timestamp::parse(&raw).ok()),
    })
}

impl EventStore for SqliteStore {
    fn append_event(&self, event: Event) -> Result<Event, EventStoreError> {
        let conn = self.lock();

        if let Some(existing) = conn
            .query_row(
                "SELECT * FROM events WHERE idempotency_key = ?1",
                params![event.idempotency_key.as_str()],
                row_to_event,
            )
            .optional()
            .map_err(|e| EventStoreError::Io(io_err(e)))?
        {
            return Err(EventStoreError::DuplicateIdempotencyKey(IdempotencyKey::new(existing.idempotency_key.into_inner())));
        }

        let txn = conn.unchecked_transaction().map_err(|e| EventStoreError::Io(io_err(e)))?;

        let sequence = if let Some(run_id) = &event.run_id {
            let next: i64 = txn
                .query_row("SELECT next_sequence FROM runs WHERE run_id = ?1", params![run_id.as_str()], |r| r.get(0))
                .map_err(|e| EventStoreError::Io(io_err(e)))?;
            let updated = txn
                .execute(
                    "UPDATE runs SET next_sequence = next_sequence + 1 WHERE run_id = ?1 AND next_sequence = ?2",
                    params![run_id.as_str(), next],
                )
                .map_err(|e| EventStoreError::Io(io_err(e)))?;
            if updated == 0 {
                return Err(EventStoreError::SequenceConflict { run_id: run_id.clone() });
            }
            Some(next)
        } else {
            None
        };

        let payload_json = serde_json::to_string(&event.payload).map_err(|e| EventStoreError::Io(io_err(e)))?;
        txn.execute(
            "INSERT INTO events (event_id, project_id, run_id, task_id, repo_id, event_type, class,
                payload_json, sequence, idempotency_key, causation_id, correlation_id, txn_id, source,
                created_at, processed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            params![
                event.event_id.as_str(),
                event.project_id.as_str(),
                event.run_id.as_ref().map(conductor_core::ids::RunId::as_str),
                event.task_id.as_ref().map(conductor_core::ids::TaskId::as_str),
                event.repo_id.as_ref().map(conductor_core::ids::RepoId::as_str),
                event.event_type,
                class_to_str(event.class),
                payload_json,
                sequence,
                event.idempotency_key.as_str(),
                event.causation_id.as_ref().map(CausationId::as_str),
                event.correlation_id.as_ref().map(CorrelationId::as_str),
                event.txn_id.as_ref().map(TxnId::as_str),
                source_to_str(event.source),
                event.created_at.to_rfc3339(),
                event.processed_at.map(Timestamp::to_rfc3339),
            ],
        )
        .map_err(|e| EventStoreError::Io(io_err(e)))?;
        txn.commit().map_err(|e| EventStoreError::Io(io_err(e)))?;

        Ok(Event { sequence, ..event })
    }

    fn next_unprocessed_event(&self, run_id: &RunId) -> Result<Option<Event>, EventStoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM events WHERE run_id = ?1 AND processed_at IS NULL ORDER BY sequence ASC LIMIT 1",
            params![run_id.as_str()],
            row_to_event,
        )
        .optional()
        .map_err(|e| EventStoreError::Io(io_err(e)))
    }

    fn mark_processed(&self, event_id: &EventId, processed_at: Timestamp) -> Result<(), EventStoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE events SET processed_at = ?1 WHERE event_id = ?2",
            params![processed_at.to_rfc3339(), event_id.as_str()],
        )
        .map_err(|e| EventStoreError::Io(io_err(e)))?;
        Ok(())
    }

    fn decision_events_for_run(&self, run_id: &RunId) -> Result<Vec<Event>, EventStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM events WHERE run_id = ?1 AND class = 'decision' ORDER BY sequence ASC")
            .map_err(|e| EventStoreError::Io(io_err(e)))?;
        let rows = stmt.query_map(params![run_id.as_str()], row_to_event).map_err(|e| EventStoreError::Io(io_err(e)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| EventStoreError::Io(io_err(e)))
    }

    fn pending_fact_events(&self) -> Result<Vec<Event>, EventStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM events WHERE run_id IS NULL AND class = 'fact' AND processed_at IS NULL
                 ORDER BY created_at ASC",
            )
            .map_err(|e| EventStoreError::Io(io_err(e)))?;
        let rows = stmt.query_map([], row_to_event).map_err(|e| EventStoreError::Io(io_err(e)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| EventStoreError::Io(io_err(e)))
    }
}

// ============================================================================
// SECTION: RunStore
// ============================================================================

impl RunStore for SqliteStore {
    fn get(&self, run_id: &RunId) -> Result<Option<Run>, RunStoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.as_str()], row_to_run)
            .optional()
            .map_err(|e| RunStoreError::Io(io_err(e)))?
            .transpose()
            .map_err(|e| RunStoreError::Io(io_err(e)))
    }

    fn transition_phase(&self, run_id: &RunId, expected_phase: RunPhase, updated: Run) -> Result<Run, RunStoreError> {
        let conn = self.lock();
        let checkpoints_json =
            serde_json::to_string(&updated.checkpoints.iter().map(CheckpointRow::from_domain).collect::<Vec<_>>())
                .map_err(|e| RunStoreError::Io(io_err(e)))?;
        let blocked_context_json = updated
            .blocked_context
            .as_ref()
            .map(|ctx| {
                serde_json::to_string(&BlockedContextRow {
                    prior_phase: ctx.prior_phase.map(phase_to_str).map(str::to_string),
                    prior_step: ctx.prior_step.map(step_to_str).map(str::to_string),
                    diagnostics: ctx.diagnostics.clone(),
                })
            })
            .transpose()
            .map_err(|e| RunStoreError::Io(io_err(e)))?;

        let updated_rows = conn
            .execute(
                "UPDATE runs SET phase = ?1, step = ?2, paused_at = ?3, paused_by = ?4,
                    blocked_reason = ?5, blocked_context_json = ?6,
                    base_branch = ?7, branch = ?8, head_sha = ?9,
                    pr_number = ?10, pr_node_id = ?11, pr_url = ?12, pr_state = ?13, pr_synced_at = ?14,
                    plan_revisions = ?15, test_fix_attempts = ?16, review_rounds = ?17,
                    result = ?18, result_reason = ?19, checkpoints_json = ?20,
                    last_event_sequence = ?21, updated_at = ?22
                 WHERE run_id = ?23 AND phase = ?24",
                params![
                    phase_to_str(updated.phase),
                    step_to_str(updated.step),
                    updated.paused_at.map(Timestamp::to_rfc3339),
                    updated.paused_by,
                    updated.blocked_context.as_ref().map(|c| c.reason.clone()),
                    blocked_context_json,
                    updated.base_branch,
                    updated.branch,
                    updated.head_sha,
                    updated.pr_bundle.as_ref().map(|b| b.pr_number),
                    updated.pr_bundle.as_ref().map(|b| b.pr_node_id.clone()),
                    updated.pr_bundle.as_ref().map(|b| b.pr_url.clone()),
                    updated.pr_bundle.as_ref().map(|b| b.pr_state.clone()),
                    updated.pr_bundle.as_ref().map(|b| b.pr_synced_at.to_rfc3339()),
                    updated.iterations.plan_revisions,
                    updated.iterations.test_fix_attempts,
                    updated.iterations.review_rounds,
                    updated.result.map(result_to_str),
                    updated.result_reason,
                    checkpoints_json,
                    updated.last_event_sequence,
                    updated.updated_at.to_rfc3339(),
                    run_id.as_str(),
                    phase_to_str(expected_phase),
                ],
            )
            .map_err(|e| RunStoreError::Io(io_err(e)))?;

        if updated_rows == 0 {
            return Err(RunStoreError::StaleTransition { run_id: run_id.clone(), expected_phase });
        }

        conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.as_str()], row_to_run)
            .map_err(|e| RunStoreError::Io(io_err(e)))?
            .map_err(|e| RunStoreError::Io(io_err(e)))
    }

    fn set_paused(&self, run_id: &RunId, paused_by: Option<String>) -> Result<Run, RunStoreError> {
        let conn = self.lock();
        let paused_at = paused_by.is_some().then(|| Timestamp::now().to_rfc3339());
        let updated = conn
            .execute(
                "UPDATE runs SET paused_at = ?1, paused_by = ?2, updated_at = ?3 WHERE run_id = ?4",
                params![paused_at, paused_by, Timestamp::now().to_rfc3339(), run_id.as_str()],
            )
            .map_err(|e| RunStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(RunStoreError::NotFound(run_id.clone()));
        }
        conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.as_str()], row_to_run)
            .map_err(|e| RunStoreError::Io(io_err(e)))?
            .map_err(|e| RunStoreError::Io(io_err(e)))
    }

    fn update_pr_bundle(&self, run_id: &RunId, expected_phase: RunPhase, bundle: PrBundle) -> Result<Run, RunStoreError> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE runs SET pr_number = ?1, pr_node_id = ?2, pr_url = ?3, pr_state = ?4, pr_synced_at = ?5,
                    step = ?6, updated_at = ?7
                 WHERE run_id = ?8 AND phase = ?9 AND step = 'create_pr'",
                params![
                    bundle.pr_number,
                    bundle.pr_node_id,
                    bundle.pr_url,
                    bundle.pr_state,
                    bundle.pr_synced_at.to_rfc3339(),
                    step_to_str(RunStep::WaitPrMerge),
                    Timestamp::now().to_rfc3339(),
                    run_id.as_str(),
                    phase_to_str(expected_phase),
                ],
            )
            .map_err(|e| RunStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(RunStoreError::StaleTransition { run_id: run_id.clone(), expected_phase });
        }
        conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.as_str()], row_to_run)
            .map_err(|e| RunStoreError::Io(io_err(e)))?
            .map_err(|e| RunStoreError::Io(io_err(e)))
    }

    fn find_by_pr_number(&self, pr_number: i64) -> Result<Option<Run>, RunStoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM runs WHERE pr_number = ?1", params![pr_number], row_to_run)
            .optional()
            .map_err(|e| RunStoreError::Io(io_err(e)))?
            .transpose()
            .map_err(|e| RunStoreError::Io(io_err(e)))
    }
}

impl SqliteStore {
    /// Inserts a brand-new run row. Not part of the `RunStore` trait since
    /// creation is not a CAS'd phase transition; used by the orchestrator's
    /// `start_run` handler.
    ///
    /// # Errors
    /// Returns [`RunStoreError::Io`] on storage failure.
    pub fn insert_run(&self, run: &Run) -> Result<(), RunStoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs (run_id, task_id, project_id, repo_id, run_number, parent_run_id,
                supersedes_run_id, phase, step, next_sequence, last_event_sequence, base_branch,
                branch, head_sha, plan_revisions, test_fix_attempts, review_rounds, checkpoints_json,
                created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            params![
                run.run_id.as_str(),
                run.task_id.as_str(),
                run.project_id.as_str(),
                run.repo_id.as_str(),
                run.run_number,
                run.parent_run_id.as_ref().map(RunId::as_str),
                run.supersedes_run_id.as_ref().map(RunId::as_str),
                phase_to_str(run.phase),
                step_to_str(run.step),
                run.next_sequence,
                run.last_event_sequence,
                run.base_branch,
                run.branch,
                run.head_sha,
                run.iterations.plan_revisions,
                run.iterations.test_fix_attempts,
                run.iterations.review_rounds,
                "[]",
                run.created_at.to_rfc3339(),
                run.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RunStoreError::Io(io_err(e)))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: GateStore
// ============================================================================

fn gate_status_to_str(status: GateStatus) -> &'static str {
    match status {
        GateStatus::Pending => "pending",
        GateStatus::Passed => "passed",
        GateStatus::Failed => "failed",
    }
}

fn gate_status_from_str(value: &str) -> GateStatus {
    match value {
        "passed" => GateStatus::Passed,
        "failed" => GateStatus::Failed,
        _ => GateStatus::Pending,
    }
}

impl GateStore for SqliteStore {
    fn record_evaluation(&self, evaluation: GateEvaluation) -> Result<GateEvaluation, GateStoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO gate_evaluations (gate_evaluation_id, run_id, gate_id, status, causation_event_id,
                details_json, evaluated_at)
             VALUES (?1,?2,?3,?4,
                (SELECT event_id FROM events WHERE run_id = ?2 AND sequence = ?5),
                ?6, ?7)",
            params![
                evaluation.gate_evaluation_id.as_str(),
                evaluation.run_id.as_str(),
                evaluation.gate_id.as_str(),
                gate_status_to_str(evaluation.status),
                evaluation.causation_event_sequence,
                serde_json::to_string(&evaluation.details).map_err(|e| GateStoreError::Io(io_err(e)))?,
                evaluation.evaluated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| GateStoreError::Io(io_err(e)))?;
        Ok(evaluation)
    }

    fn evaluations_for_run(&self, run_id: &RunId) -> Result<Vec<GateEvaluation>, GateStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ge.gate_evaluation_id, ge.run_id, ge.gate_id, ge.status, ge.details_json, ge.evaluated_at,
                        e.sequence
                 FROM gate_evaluations ge JOIN events e ON e.event_id = ge.causation_event_id
                 WHERE ge.run_id = ?1",
            )
            .map_err(|e| GateStoreError::Io(io_err(e)))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|e| GateStoreError::Io(io_err(e)))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, run_id, gate_id, status, details_json, evaluated_at, sequence) =
                row.map_err(|e| GateStoreError::Io(io_err(e)))?;
            out.push(GateEvaluation {
                gate_evaluation_id: GateEvalId::new(id),
                run_id: RunId::new(run_id),
                gate_id: GateId::new(gate_id),
                status: gate_status_from_str(&status),
                causation_event_sequence: sequence,
                details: serde_json::from_str(&details_json).map_err(|e| GateStoreError::Io(io_err(e)))?,
                evaluated_at: Timestamp::parse(&evaluated_at).map_err(|e| GateStoreError::Io(io_err(e)))?,
            });
        }
        Ok(out)
    }

    fn record_routing_decision(&self, decision: RoutingDecision) -> Result<(), GateStoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO routing_decisions (run_id, required_gates_json, optional_gates_json, decided_at)
             VALUES (?1,?2,?3,?4)",
            params![
                decision.run_id.as_str(),
                serde_json::to_string(&decision.required_gates.iter().map(GateId::as_str).collect::<Vec<_>>())
                    .map_err(|e| GateStoreError::Io(io_err(e)))?,
                serde_json::to_string(&decision.optional_gates.iter().map(GateId::as_str).collect::<Vec<_>>())
                    .map_err(|e| GateStoreError::Io(io_err(e)))?,
                decision.decided_at.to_rfc3339(),
            ],
        )
        .map_err(|e| GateStoreError::Io(io_err(e)))?;
        Ok(())
    }

    fn routing_decision_for_run(&self, run_id: &RunId) -> Result<Option<RoutingDecision>, GateStoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT required_gates_json, optional_gates_json, decided_at FROM routing_decisions WHERE run_id = ?1",
            params![run_id.as_str()],
            |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            },
        )
        .optional()
        .map_err(|e| GateStoreError::Io(io_err(e)))?
        .map(|(required, optional, decided_at)| {
            let required: Vec<String> = serde_json::from_str(&required).map_err(|e| GateStoreError::Io(io_err(e)))?;
            let optional: Vec<String> = serde_json::from_str(&optional).map_err(|e| GateStoreError::Io(io_err(e)))?;
            Ok(RoutingDecision {
                run_id: run_id.clone(),
                required_gates: required.into_iter().map(GateId::new).collect(),
                optional_gates: optional.into_iter().map(GateId::new).collect(),
                decided_at: Timestamp::parse(&decided_at).map_err(|e| GateStoreError::Io(io_err(e)))?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// SECTION: JobStore
// ============================================================================

fn queue_to_str(queue: Queue) -> &'static str {
    match queue {
        Queue::Run => "run",
        Queue::Agent => "agent",
        Queue::Outbox => "outbox",
    }
}

fn queue_from_str(value: &str) -> Queue {
    match value {
        "agent" => Queue::Agent,
        "outbox" => Queue::Outbox,
        _ => Queue::Run,
    }
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn job_status_from_str(value: &str) -> JobStatus {
    match value {
        "processing" => JobStatus::Processing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Queued,
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let queue: String = row.get("queue")?;
    let status: String = row.get("status")?;
    let payload_json: String = row.get("payload_json")?;
    Ok(Job {
        job_id: JobId::new(row.get::<_, String>("job_id")?),
        queue: queue_from_str(&queue),
        job_type: row.get("job_type")?,
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        idempotency_key: IdempotencyKey::new(row.get::<_, String>("idempotency_key")?),
        status: job_status_from_str(&status),
        priority: row.get("priority")?,
        claimed_by: row.get("claimed_by")?,
        claimed_at: row.get::<_, Option<String>>("claimed_at")?.and_then(|s| Timestamp::parse(&s).ok()),
        lease_expires_at: row.get::<_, Option<String>>("lease_expires_at")?.and_then(|s| Timestamp::parse(&s).ok()),
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        last_error: row.get("last_error")?,
        next_retry_at: row.get::<_, Option<String>>("next_retry_at")?.and_then(|s| Timestamp::parse(&s).ok()),
        created_at: Timestamp::parse(&row.get::<_, String>("created_at")?).unwrap_or_else(|_| Timestamp::now()),
    })
}

impl JobStore for SqliteStore {
    fn enqueue(&self, job: Job) -> Result<Job, JobStoreError> {
        let conn = self.lock();
        if let Some(existing) = conn
            .query_row("SELECT * FROM jobs WHERE idempotency_key = ?1", params![job.idempotency_key.as_str()], row_to_job)
            .optional()
            .map_err(|e| JobStoreError::Io(io_err(e)))?
        {
            return Ok(existing);
        }
        conn.execute(
            "INSERT INTO jobs (job_id, queue, job_type, payload_json, idempotency_key, status, priority,
                attempts, max_attempts, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                job.job_id.as_str(),
                queue_to_str(job.queue),
                job.job_type,
                serde_json::to_string(&job.payload).map_err(|e| JobStoreError::Io(io_err(e)))?,
                job.idempotency_key.as_str(),
                job_status_to_str(job.status),
                job.priority,
                job.attempts,
                job.max_attempts,
                job.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| JobStoreError::Io(io_err(e)))?;
        Ok(job)
    }

    fn claim(&self, queue: Queue, worker_id: &str, lease_ms: u64) -> Result<Option<Job>, JobStoreError> {
        let conn = self.lock();
        let job_id: Option<String> = conn
            .query_row(
                "SELECT job_id FROM jobs
                 WHERE queue = ?1 AND status = 'queued' AND (next_retry_at IS NULL OR next_retry_at <= ?2)
                 ORDER BY priority DESC, created_at ASC LIMIT 1",
                params![queue_to_str(queue), now_rfc3339()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| JobStoreError::Io(io_err(e)))?;
        let Some(job_id) = job_id else {
            return Ok(None);
        };
        let now = Timestamp::now();
        let lease_expires_at =
            Timestamp::from_offset_date_time(now.as_offset_date_time() + time::Duration::milliseconds(i64::try_from(lease_ms).unwrap_or(i64::MAX)));
        conn.execute(
            "UPDATE jobs SET status = 'processing', claimed_by = ?1, claimed_at = ?2, lease_expires_at = ?3,
                attempts = attempts + 1
             WHERE job_id = ?4",
            params![worker_id, now.to_rfc3339(), lease_expires_at.to_rfc3339(), job_id],
        )
        .map_err(|e| JobStoreError::Io(io_err(e)))?;
        conn.query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id], row_to_job)
            .map(Some)
            .map_err(|e| JobStoreError::Io(io_err(e)))
    }

    fn complete(&self, job_id: &JobId, worker_id: &str) -> Result<(), JobStoreError> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE jobs SET status = 'completed', claimed_by = NULL, lease_expires_at = NULL
                 WHERE job_id = ?1 AND claimed_by = ?2",
                params![job_id.as_str(), worker_id],
            )
            .map_err(|e| JobStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(JobStoreError::NotFoundOrNotOwned(job_id.clone()));
        }
        Ok(())
    }

    fn fail(&self, job_id: &JobId, worker_id: &str, error: &str, disposition: FailureDisposition) -> Result<(), JobStoreError> {
        let conn = self.lock();
        let (status, next_retry_at): (&str, Option<String>) = match disposition {
            FailureDisposition::Terminal => ("failed", None),
            FailureDisposition::RetryAfterMs(delay_ms) => {
                let attempts: u32 = conn
                    .query_row("SELECT attempts FROM jobs WHERE job_id = ?1", params![job_id.as_str()], |r| r.get(0))
                    .map_err(|e| JobStoreError::Io(io_err(e)))?;
                let max_attempts: u32 = conn
                    .query_row("SELECT max_attempts FROM jobs WHERE job_id = ?1", params![job_id.as_str()], |r| r.get(0))
                    .map_err(|e| JobStoreError::Io(io_err(e)))?;
                if attempts >= max_attempts {
                    ("failed", None)
                } else {
                    let retry_at = Timestamp::from_offset_date_time(
                        Timestamp::now().as_offset_date_time() + time::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX)),
                    );
                    ("queued", Some(retry_at.to_rfc3339()))
                }
            }
        };
        let updated = conn
            .execute(
                "UPDATE jobs SET status = ?1, last_error = ?2, next_retry_at = ?3, claimed_by = NULL,
                    lease_expires_at = NULL
                 WHERE job_id = ?4 AND claimed_by = ?5",
                params![status, error, next_retry_at, job_id.as_str(), worker_id],
            )
            .map_err(|e| JobStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(JobStoreError::NotFoundOrNotOwned(job_id.clone()));
        }
        Ok(())
    }

    fn extend_lease(&self, job_id: &JobId, worker_id: &str, lease_ms: u64) -> Result<(), JobStoreError> {
        let conn = self.lock();
        let lease_expires_at = Timestamp::from_offset_date_time(
            Timestamp::now().as_offset_date_time() + time::Duration::milliseconds(i64::try_from(lease_ms).unwrap_or(i64::MAX)),
        );
        let updated = conn
            .execute(
                "UPDATE jobs SET lease_expires_at = ?1 WHERE job_id = ?2 AND claimed_by = ?3 AND status = 'processing'",
                params![lease_expires_at.to_rfc3339(), job_id.as_str(), worker_id],
            )
            .map_err(|e| JobStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(JobStoreError::NotFoundOrNotOwned(job_id.clone()));
        }
        Ok(())
    }

    fn reclaim_stalled(&self, now: Timestamp) -> Result<u64, JobStoreError> {
        let conn = self.lock();
        let reclaimable: Vec<(String, u32, u32)> = {
            let mut stmt = conn
                .prepare("SELECT job_id, attempts, max_attempts FROM jobs WHERE status = 'processing' AND lease_expires_at < ?1")
                .map_err(|e| JobStoreError::Io(io_err(e)))?;
            stmt.query_map(params![now.to_rfc3339()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, row.get::<_, u32>(2)?))
            })
            .map_err(|e| JobStoreError::Io(io_err(e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| JobStoreError::Io(io_err(e)))?
        };
        let mut reclaimed = 0u64;
        for (job_id, attempts, max_attempts) in reclaimable {
            let new_status = if attempts >= max_attempts { "failed" } else { "queued" };
            conn.execute(
                "UPDATE jobs SET status = ?1, claimed_by = NULL, lease_expires_at = NULL WHERE job_id = ?2",
                params![new_status, job_id],
            )
            .map_err(|e| JobStoreError::Io(io_err(e)))?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

// ============================================================================
// SECTION: OutboxStore
// ============================================================================

fn write_kind_to_str(kind: GitHubWriteKind) -> &'static str {
    match kind {
        GitHubWriteKind::CreatePr => "create_pr",
        GitHubWriteKind::PostComment => "post_comment",
        GitHubWriteKind::UpdateStatusCheck => "update_status_check",
    }
}

fn write_kind_from_str(value: &str) -> GitHubWriteKind {
    match value {
        "post_comment" => GitHubWriteKind::PostComment,
        "update_status_check" => GitHubWriteKind::UpdateStatusCheck,
        _ => GitHubWriteKind::CreatePr,
    }
}

fn write_status_to_str(status: GitHubWriteStatus) -> &'static str {
    match status {
        GitHubWriteStatus::Queued => "queued",
        GitHubWriteStatus::Processing => "processing",
        GitHubWriteStatus::Sent => "sent",
        GitHubWriteStatus::Failed => "failed",
        GitHubWriteStatus::Ambiguous => "ambiguous",
        GitHubWriteStatus::Cancelled => "cancelled",
    }
}

fn write_status_from_str(value: &str) -> GitHubWriteStatus {
    match value {
        "processing" => GitHubWriteStatus::Processing,
        "sent" => GitHubWriteStatus::Sent,
        "failed" => GitHubWriteStatus::Failed,
        "ambiguous" => GitHubWriteStatus::Ambiguous,
        "cancelled" => GitHubWriteStatus::Cancelled,
        _ => GitHubWriteStatus::Queued,
    }
}

fn row_to_write(row: &rusqlite::Row<'_>) -> rusqlite::Result<GitHubWrite> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let payload_json: String = row.get("payload_json")?;
    Ok(GitHubWrite {
        github_write_id: GitHubWriteId::new(row.get::<_, String>("github_write_id")?),
        run_id: RunId::new(row.get::<_, String>("run_id")?),
        kind: write_kind_from_str(&kind),
        target_node_id: row.get("target_node_id")?,
        idempotency_key: IdempotencyKey::new(row.get::<_, String>("idempotency_key")?),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        payload_hash: row.get("payload_hash")?,
        status: write_status_from_str(&status),
        github_id: row.get("github_id")?,
        github_number: row.get("github_number")?,
        github_url: row.get("github_url")?,
        retry_count: row.get("retry_count")?,
    })
}

impl OutboxStore for SqliteStore {
    fn enqueue_write(&self, write: GitHubWrite) -> Result<GitHubWrite, OutboxStoreError> {
        let conn = self.lock();
        if let Some(existing) = conn
            .query_row(
                "SELECT * FROM github_writes WHERE idempotency_key = ?1",
                params![write.idempotency_key.as_str()],
                row_to_write,
            )
            .optional()
            .map_err(|e| OutboxStoreError::Io(io_err(e)))?
        {
            return Ok(existing);
        }
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO github_writes (github_write_id, run_id, kind, target_node_id, idempotency_key,
                payload_json, payload_hash, status, retry_count, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                write.github_write_id.as_str(),
                write.run_id.as_str(),
                write_kind_to_str(write.kind),
                write.target_node_id,
                write.idempotency_key.as_str(),
                serde_json::to_string(&write.payload).map_err(|e| OutboxStoreError::Io(io_err(e)))?,
                write.payload_hash,
                write_status_to_str(write.status),
                write.retry_count,
                now.clone(),
                now,
            ],
        )
        .map_err(|e| OutboxStoreError::Io(io_err(e)))?;
        Ok(write)
    }

    fn get(&self, id: &GitHubWriteId) -> Result<GitHubWrite, OutboxStoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM github_writes WHERE github_write_id = ?1", params![id.as_str()], row_to_write)
            .optional()
            .map_err(|e| OutboxStoreError::Io(io_err(e)))?
            .ok_or_else(|| OutboxStoreError::NotFound(id.clone()))
    }

    fn update_status(&self, write: GitHubWrite) -> Result<GitHubWrite, OutboxStoreError> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE github_writes SET status = ?1, github_id = ?2, github_number = ?3, github_url = ?4,
                    retry_count = ?5, updated_at = ?6
                 WHERE github_write_id = ?7",
                params![
                    write_status_to_str(write.status),
                    write.github_id,
                    write.github_number,
                    write.github_url,
                    write.retry_count,
                    now_rfc3339(),
                    write.github_write_id.as_str(),
                ],
            )
            .map_err(|e| OutboxStoreError::Io(io_err(e)))?;
        if updated == 0 {
            return Err(OutboxStoreError::NotFound(write.github_write_id));
        }
        Ok(write)
    }

    fn ambiguous_writes(&self) -> Result<Vec<GitHubWrite>, OutboxStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM github_writes WHERE status = 'ambiguous' ORDER BY created_at ASC")
            .map_err(|e| OutboxStoreError::Io(io_err(e)))?;
        let rows = stmt.query_map([], row_to_write).map_err(|e| OutboxStoreError::Io(io_err(e)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| OutboxStoreError::Io(io_err(e)))
    }
}

// ============================================================================
// SECTION: ArtifactStore
// ============================================================================

fn artifact_kind_to_str(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Plan => "plan",
        ArtifactKind::TestReport => "test_report",
        ArtifactKind::Review => "review",
    }
}

fn artifact_kind_from_str(value: &str) -> ArtifactKind {
    match value {
        "test_report" => ArtifactKind::TestReport,
        "review" => ArtifactKind::Review,
        _ => ArtifactKind::Plan,
    }
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("validation_status")?;
    let content_json: String = row.get("content_json")?;
    Ok(Artifact {
        artifact_id: ArtifactId::new(row.get::<_, String>("artifact_id")?),
        run_id: RunId::new(row.get::<_, String>("run_id")?),
        kind: artifact_kind_from_str(&kind),
        version: row.get("version")?,
        content: serde_json::from_str(&content_json).unwrap_or(serde_json::Value::Null),
        checksum_sha256: row.get("checksum_sha256")?,
        validation_status: match status.as_str() {
            "valid" => conductor_core::artifact::ValidationStatus::Valid,
            "invalid" => conductor_core::artifact::ValidationStatus::Invalid,
            _ => conductor_core::artifact::ValidationStatus::Pending,
        },
        created_at: Timestamp::parse(&row.get::<_, String>("created_at")?).unwrap_or_else(|_| Timestamp::now()),
    })
}

impl ArtifactStore for SqliteStore {
    fn record(&self, artifact: Artifact) -> Result<Artifact, ArtifactStoreError> {
        let conn = self.lock();
        let status = match artifact.validation_status {
            conductor_core::artifact::ValidationStatus::Pending => "pending",
            conductor_core::artifact::ValidationStatus::Valid => "valid",
            conductor_core::artifact::ValidationStatus::Invalid => "invalid",
        };
        conn.execute(
            "INSERT INTO artifacts (artifact_id, run_id, kind, version, content_json, checksum_sha256,
                validation_status, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                artifact.artifact_id.as_str(),
                artifact.run_id.as_str(),
                artifact_kind_to_str(artifact.kind),
                artifact.version,
                serde_json::to_string(&artifact.content).map_err(|e| ArtifactStoreError::Io(io_err(e)))?,
                artifact.checksum_sha256,
                status,
                artifact.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| ArtifactStoreError::Io(io_err(e)))?;
        Ok(artifact)
    }

    fn latest(&self, run_id: &RunId, kind: ArtifactKind) -> Result<Option<Artifact>, ArtifactStoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM artifacts WHERE run_id = ?1 AND kind = ?2 ORDER BY version DESC LIMIT 1",
            params![run_id.as_str(), artifact_kind_to_str(kind)],
            row_to_artifact,
        )
        .optional()
        .map_err(|e| ArtifactStoreError::Io(io_err(e)))
    }

    fn get(&self, artifact_id: &ArtifactId) -> Result<Option<Artifact>, ArtifactStoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM artifacts WHERE artifact_id = ?1", params![artifact_id.as_str()], row_to_artifact)
            .optional()
            .map_err(|e| ArtifactStoreError::Io(io_err(e)))
    }
}

// ============================================================================
// SECTION: PolicyStore
// ============================================================================

#[derive(Serialize, Deserialize)]
struct PolicySetEntryRow {
    config: serde_json::Value,
    enabled: bool,
}

impl PolicyStore for SqliteStore {
    fn current_policy_set(&self) -> Result<PolicySet, PolicyStoreError> {
        let conn = self.lock();
        let policy_set_id: String = conn
            .query_row("SELECT policy_set_id FROM policy_sets ORDER BY created_at DESC LIMIT 1", [], |row| row.get(0))
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        drop(conn);
        self.policy_set(&PolicySetId::new(policy_set_id))
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?
            .ok_or_else(|| PolicyStoreError::Io("current policy set vanished".into()))
    }

    fn policy_set(&self, id: &PolicySetId) -> Result<Option<PolicySet>, PolicyStoreError> {
        let conn = self.lock();
        let base = conn
            .query_row(
                "SELECT replaces_policy_set_id, created_at FROM policy_sets WHERE policy_set_id = ?1",
                params![id.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        let Some((replaces, created_at)) = base else {
            return Ok(None);
        };
        let mut stmt = conn
            .prepare("SELECT rule_name, rule_json FROM policy_set_entries WHERE policy_set_id = ?1 ORDER BY ordinal ASC")
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        let entries = stmt
            .query_map(params![id.as_str()], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        let mut parsed_entries = Vec::with_capacity(entries.len());
        for (rule_name, rule_json) in entries {
            let entry: PolicySetEntryRow = serde_json::from_str(&rule_json).map_err(|e| PolicyStoreError::Io(io_err(e)))?;
            parsed_entries.push(PolicySetEntry { rule_name, config: entry.config, enabled: entry.enabled });
        }
        Ok(Some(PolicySet {
            policy_set_id: id.clone(),
            replaces_policy_set_id: replaces.map(PolicySetId::new),
            entries: parsed_entries,
            created_at: Timestamp::parse(&created_at).map_err(|e| PolicyStoreError::Io(io_err(e)))?,
        }))
    }

    fn record_violation(&self, violation: PolicyViolation) -> Result<PolicyViolation, PolicyStoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO policy_violations (policy_violation_id, run_id, policy_set_id, rule_name, file_path,
                line_start, line_end, pattern_name, content_hash, evidence_id, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                violation.policy_violation_id.as_str(),
                violation.run_id.as_str(),
                violation.policy_set_id.as_str(),
                violation.rule_name,
                violation.file_path,
                violation.line_range.map(|(start, _)| start),
                violation.line_range.map(|(_, end)| end),
                violation.pattern_name,
                violation.content_hash,
                violation.evidence_id.as_ref().map(conductor_core::ids::EvidenceId::as_str),
                violation.occurred_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        Ok(violation)
    }

    fn record_override(&self, grant: Override) -> Result<Override, PolicyStoreError> {
        let conn = self.lock();
        let scope_str = match grant.scope {
            OverrideScope::ThisRun => "this_run",
            OverrideScope::ThisTask => "this_task",
            OverrideScope::ThisRepo => "this_repo",
            OverrideScope::ProjectWide => "project_wide",
        };
        let run_id: String = conn
            .query_row(
                "SELECT run_id FROM policy_violations WHERE policy_violation_id = ?1",
                params![grant.policy_violation_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        conn.execute(
            "INSERT INTO overrides (override_id, run_id, policy_violation_id, scope, constraint_json, granted_by,
                granted_at, expires_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                grant.override_id.as_str(),
                run_id,
                grant.policy_violation_id.as_str(),
                scope_str,
                serde_json::to_string(&grant.constraint).map_err(|e| PolicyStoreError::Io(io_err(e)))?,
                grant.granted_by,
                grant.granted_at.to_rfc3339(),
                grant.expires_at.map(Timestamp::to_rfc3339),
            ],
        )
        .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        Ok(grant)
    }

    fn active_overrides_for_run(&self, run_id: &RunId) -> Result<Vec<Override>, PolicyStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT override_id, scope, constraint_json, granted_by, granted_at, expires_at, policy_violation_id
                 FROM overrides WHERE run_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            )
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        let rows = stmt
            .query_map(params![run_id.as_str(), now_rfc3339()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PolicyStoreError::Io(io_err(e)))?;
        let mut out = Vec::with_capacity(rows.len());
        for (id, scope, constraint_json, granted_by, granted_at, expires_at, violation_id) in rows {
            let scope = match scope.as_str() {
                "this_task" => OverrideScope::ThisTask,
                "this_repo" => OverrideScope::ThisRepo,
                "project_wide" => OverrideScope::ProjectWide,
                _ => OverrideScope::ThisRun,
            };
            let constraint: OverrideConstraint =
                serde_json::from_str(&constraint_json).map_err(|e| PolicyStoreError::Io(io_err(e)))?;
            out.push(Override {
                override_id: OverrideId::new(id),
                policy_violation_id: PolicyViolationId::new(violation_id),
                scope,
                constraint,
                granted_by,
                granted_at: Timestamp::parse(&granted_at).map_err(|e| PolicyStoreError::Io(io_err(e)))?,
                expires_at: expires_at
                    .map(|raw| Timestamp::parse(&raw))
                    .transpose()
                    .map_err(|e| PolicyStoreError::Io(io_err(e)))?,
            });
        }
        Ok(out)
    }
}

// ============================================================================
// SECTION: WorktreeStore
// ============================================================================

fn worktree_status_to_str(status: WorktreeStatus) -> &'static str {
    match status {
        WorktreeStatus::Provisioning => "provisioning",
        WorktreeStatus::Ready => "ready",
        WorktreeStatus::Destroyed => "destroyed",
    }
}

fn worktree_status_from_str(value: &str) -> WorktreeStatus {
    match value {
        "ready" => WorktreeStatus::Ready,
        "destroyed" => WorktreeStatus::Destroyed,
        _ => WorktreeStatus::Provisioning,
    }
}

impl WorktreeStore for SqliteStore {
    fn create(&self, worktree: Worktree) -> Result<Worktree, WorktreeStoreError> {
        let conn = self.lock();
        let already_active: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM worktrees WHERE run_id = ?1 AND destroyed_at IS NULL)",
                params![worktree.run_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        if already_active {
            return Err(WorktreeStoreError::AlreadyActive(worktree.run_id));
        }
        conn.execute(
            "INSERT INTO worktrees (worktree_id, run_id, path, branch_name, base_commit, status,
                last_heartbeat_at, destroyed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,NULL)",
            params![
                worktree.worktree_id.as_str(),
                worktree.run_id.as_str(),
                worktree.path,
                worktree.branch_name,
                worktree.base_commit,
                worktree_status_to_str(worktree.status),
                worktree.last_heartbeat_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        Ok(worktree)
    }

    fn destroy(&self, worktree_id: &WorktreeId, destroyed_at: Timestamp) -> Result<(), WorktreeStoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE worktrees SET status = 'destroyed', destroyed_at = ?1 WHERE worktree_id = ?2",
            params![destroyed_at.to_rfc3339(), worktree_id.as_str()],
        )
        .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        Ok(())
    }

    fn active_for_run(&self, run_id: &RunId) -> Result<Option<Worktree>, WorktreeStoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM worktrees WHERE run_id = ?1 AND destroyed_at IS NULL", params![run_id.as_str()], |row| {
            let status: String = row.get("status")?;
            Ok(Worktree {
                worktree_id: WorktreeId::new(row.get::<_, String>("worktree_id")?),
                run_id: RunId::new(row.get::<_, String>("run_id")?),
                path: row.get("path")?,
                branch_name: row.get("branch_name")?,
                base_commit: row.get("base_commit")?,
                status: worktree_status_from_str(&status),
                last_heartbeat_at: Timestamp::parse(&row.get::<_, String>("last_heartbeat_at")?)
                    .unwrap_or_else(|_| Timestamp::now()),
                destroyed_at: row.get::<_, Option<String>>("destroyed_at")?.and_then(|s| Timestamp::parse(&s).ok()),
            })
        })
        .optional()
        .map_err(|e| WorktreeStoreError::Io(io_err(e)))
    }

    fn active_worktrees(&self) -> Result<Vec<Worktree>, WorktreeStoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM worktrees WHERE destroyed_at IS NULL")
            .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get("status")?;
                Ok(Worktree {
                    worktree_id: WorktreeId::new(row.get::<_, String>("worktree_id")?),
                    run_id: RunId::new(row.get::<_, String>("run_id")?),
                    path: row.get("path")?,
                    branch_name: row.get("branch_name")?,
                    base_commit: row.get("base_commit")?,
                    status: worktree_status_from_str(&status),
                    last_heartbeat_at: Timestamp::parse(&row.get::<_, String>("last_heartbeat_at")?)
                        .unwrap_or_else(|_| Timestamp::now()),
                    destroyed_at: row.get::<_, Option<String>>("destroyed_at")?.and_then(|s| Timestamp::parse(&s).ok()),
                })
            })
            .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| WorktreeStoreError::Io(io_err(e)))
    }

    fn lease_port(&self, worktree_id: &WorktreeId) -> Result<PortLease, WorktreeStoreError> {
        let conn = self.lock();
        let (project_id, port_min, port_max): (String, i64, i64) = conn
            .query_row(
                "SELECT r.project_id, 20000, 29999 FROM worktrees w JOIN runs r ON r.run_id = w.run_id
                 WHERE w.worktree_id = ?1",
                params![worktree_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        let taken: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT port FROM port_leases WHERE project_id = ?1 AND is_active = 1")
                .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
            stmt.query_map(params![project_id], |row| row.get(0))
                .map_err(|e| WorktreeStoreError::Io(io_err(e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| WorktreeStoreError::Io(io_err(e)))?
        };
        let port = (port_min..=port_max).find(|candidate| !taken.contains(candidate)).ok_or(WorktreeStoreError::PortExhausted)?;
        let lease = PortLease {
            port_lease_id: PortLeaseId::new(format!("pl_{project_id}_{port}")),
            project_id: ProjectId::new(project_id),
            worktree_id: worktree_id.clone(),
            port: u16::try_from(port).unwrap_or(0),
            is_active: true,
            leased_at: Timestamp::now(),
            released_at: None,
        };
        conn.execute(
            "INSERT INTO port_leases (port_lease_id, project_id, worktree_id, port, is_active, leased_at, released_at)
             VALUES (?1,?2,?3,?4,1,?5,NULL)",
            params![
                lease.port_lease_id.as_str(),
                lease.project_id.as_str(),
                lease.worktree_id.as_str(),
                lease.port,
                lease.leased_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        Ok(lease)
    }

    fn release_port(&self, lease: &PortLease) -> Result<(), WorktreeStoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE port_leases SET is_active = 0, released_at = ?1 WHERE port_lease_id = ?2",
            params![Timestamp::now().to_rfc3339(), lease.port_lease_id.as_str()],
        )
        .map_err(|e| WorktreeStoreError::Io(io_err(e)))?;
        Ok(())
    }
}
