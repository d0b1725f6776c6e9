// conductor-store-sqlite/src/schema.rs
// ============================================================================
// Module: Schema Migrations
// Description: Forward-only, numbered SQL migrations for the relational
//              contract in §6.1.
// Purpose: Let the store bring a fresh or existing database file up to the
//          current schema deterministically.
// Dependencies: rusqlite
// ============================================================================

//! Migrations are forward-only and numbered (§6.1 "Schema evolves via
//! forward-only, numbered migrations"). Each entry in [`MIGRATIONS`] runs
//! inside its own transaction; `schema_migrations` records which have
//! applied. Adding a constraint that existing rows could violate would
//! require a data-repair step inside that migration — per the design note
//! in §9, we adopt the stricter rebuild form rather than a racy
//! add-then-backfill, but this workspace's schema is young enough that no
//! migration needs one yet.

use rusqlite::Connection;
use rusqlite::Transaction;

/// One forward-only migration: a monotonically increasing id and the SQL
/// statements that bring the schema from `id - 1` to `id`.
pub struct Migration {
    /// Migration number. Applied in ascending order, each exactly once.
    pub id: i64,
    /// Human-readable name for `schema_migrations.name` and logs.
    pub name: &'static str,
    /// The DDL/DML statements this migration applies, run in one transaction.
    pub statements: &'static [&'static str],
}

/// All migrations, in application order.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "initial_schema",
        statements: &[
            "CREATE TABLE projects (
                project_id TEXT PRIMARY KEY,
                github_installation_id TEXT UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE repos (
                repo_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                full_name TEXT NOT NULL,
                default_branch TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE tasks (
                task_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                external_node_id TEXT NOT NULL,
                display_slug TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(repo_id, external_node_id)
            )",
            "CREATE TABLE runs (
                run_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(task_id),
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                run_number INTEGER NOT NULL,
                parent_run_id TEXT REFERENCES runs(run_id),
                supersedes_run_id TEXT REFERENCES runs(run_id),
                phase TEXT NOT NULL,
                step TEXT NOT NULL,
                next_sequence INTEGER NOT NULL DEFAULT 1,
                last_event_sequence INTEGER NOT NULL DEFAULT 0,
                paused_at TEXT,
                paused_by TEXT,
                blocked_reason TEXT,
                blocked_context_json TEXT,
                base_branch TEXT NOT NULL,
                branch TEXT,
                head_sha TEXT,
                pr_number INTEGER,
                pr_node_id TEXT,
                pr_url TEXT,
                pr_state TEXT,
                pr_synced_at TEXT,
                plan_revisions INTEGER NOT NULL DEFAULT 0,
                test_fix_attempts INTEGER NOT NULL DEFAULT 0,
                review_rounds INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                result_reason TEXT,
                checkpoints_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(task_id, run_number),
                CHECK (
                    (pr_number IS NULL AND pr_node_id IS NULL AND pr_url IS NULL
                        AND pr_state IS NULL AND pr_synced_at IS NULL)
                    OR
                    (pr_number IS NOT NULL AND pr_node_id IS NOT NULL AND pr_url IS NOT NULL
                        AND pr_state IS NOT NULL AND pr_synced_at IS NOT NULL)
                )
            )",
            "CREATE TABLE events (
                event_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                run_id TEXT REFERENCES runs(run_id),
                task_id TEXT REFERENCES tasks(task_id),
                repo_id TEXT REFERENCES repos(repo_id),
                event_type TEXT NOT NULL,
                class TEXT NOT NULL CHECK (class IN ('fact','decision','signal')),
                payload_json TEXT NOT NULL,
                sequence INTEGER,
                idempotency_key TEXT NOT NULL UNIQUE,
                causation_id TEXT REFERENCES events(event_id),
                correlation_id TEXT,
                txn_id TEXT,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                processed_at TEXT,
                CHECK ((run_id IS NULL) = (sequence IS NULL))
            )",
            "CREATE UNIQUE INDEX events_run_sequence_uq ON events(run_id, sequence) WHERE run_id IS NOT NULL",
            "CREATE INDEX events_run_sequence_idx ON events(run_id, sequence)",
            "CREATE INDEX events_run_unprocessed_idx ON events(run_id, sequence) WHERE processed_at IS NULL",
            "CREATE TABLE gate_evaluations (
                gate_evaluation_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                gate_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending','passed','failed')),
                causation_event_id TEXT NOT NULL REFERENCES events(event_id),
                details_json TEXT NOT NULL,
                evaluated_at TEXT NOT NULL
            )",
            "CREATE INDEX gate_evaluations_run_gate_idx ON gate_evaluations(run_id, gate_id)",
            "CREATE TABLE routing_decisions (
                run_id TEXT PRIMARY KEY REFERENCES runs(run_id),
                required_gates_json TEXT NOT NULL,
                optional_gates_json TEXT NOT NULL,
                decided_at TEXT NOT NULL
            )",
            "CREATE TABLE jobs (
                job_id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                job_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                claimed_at TEXT,
                lease_expires_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 5,
                last_error TEXT,
                next_retry_at TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX jobs_claim_idx ON jobs(queue, status, priority DESC, created_at ASC)",
            "CREATE INDEX jobs_reclaim_idx ON jobs(queue, status, lease_expires_at)",
            "CREATE TABLE github_writes (
                github_write_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                kind TEXT NOT NULL,
                target_node_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                payload_json TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                github_id TEXT,
                github_number INTEGER,
                github_url TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX github_writes_status_idx ON github_writes(status, created_at)",
            "CREATE TABLE worktrees (
                worktree_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                path TEXT NOT NULL,
                branch_name TEXT NOT NULL,
                base_commit TEXT NOT NULL,
                status TEXT NOT NULL,
                last_heartbeat_at TEXT NOT NULL,
                destroyed_at TEXT
            )",
            "CREATE UNIQUE INDEX worktrees_run_active_uq ON worktrees(run_id) WHERE destroyed_at IS NULL",
            "CREATE TABLE port_leases (
                port_lease_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                worktree_id TEXT NOT NULL REFERENCES worktrees(worktree_id),
                port INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                leased_at TEXT NOT NULL,
                released_at TEXT
            )",
            "CREATE UNIQUE INDEX port_leases_active_uq ON port_leases(project_id, port) WHERE is_active = 1",
            "CREATE TABLE artifacts (
                artifact_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                kind TEXT NOT NULL,
                version INTEGER NOT NULL,
                content_json TEXT NOT NULL,
                checksum_sha256 TEXT NOT NULL,
                validation_status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(run_id, kind, version)
            )",
            "CREATE TABLE policy_sets (
                policy_set_id TEXT PRIMARY KEY,
                replaces_policy_set_id TEXT REFERENCES policy_sets(policy_set_id),
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE policy_set_entries (
                policy_set_id TEXT NOT NULL REFERENCES policy_sets(policy_set_id),
                rule_name TEXT NOT NULL,
                rule_json TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                PRIMARY KEY (policy_set_id, rule_name)
            )",
            "CREATE TABLE policy_violations (
                policy_violation_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                policy_set_id TEXT NOT NULL REFERENCES policy_sets(policy_set_id),
                rule_name TEXT NOT NULL,
                file_path TEXT,
                line_start INTEGER,
                line_end INTEGER,
                pattern_name TEXT,
                content_hash TEXT,
                evidence_id TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE evidences (
                evidence_id TEXT PRIMARY KEY,
                policy_violation_id TEXT NOT NULL REFERENCES policy_violations(policy_violation_id),
                ciphertext BLOB NOT NULL,
                retention_expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE overrides (
                override_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                scope TEXT NOT NULL,
                constraint_json TEXT NOT NULL,
                granted_by TEXT NOT NULL,
                granted_at TEXT NOT NULL,
                expires_at TEXT
            )",
            "CREATE TABLE policy_audit_entries (
                policy_audit_id TEXT PRIMARY KEY,
                policy_set_id TEXT NOT NULL REFERENCES policy_sets(policy_set_id),
                run_id TEXT REFERENCES runs(run_id),
                action TEXT NOT NULL,
                actor TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE agent_messages (
                agent_invocation_id TEXT NOT NULL,
                turn_index INTEGER NOT NULL CHECK (turn_index >= 0),
                role TEXT NOT NULL,
                content_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (agent_invocation_id, turn_index)
            )",
            "CREATE TABLE stream_events (
                stream_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                event_id TEXT NOT NULL REFERENCES events(event_id),
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE tool_invocations (
                tool_invocation_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                tool_name TEXT NOT NULL,
                arguments_json TEXT NOT NULL,
                policy_decision TEXT NOT NULL,
                result_meta_json TEXT,
                payload_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        ],
    },
    Migration {
        id: 2,
        name: "pending_github_installations",
        statements: &[
            "CREATE TABLE pending_github_installations (
                installation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (installation_id, user_id)
            )",
        ],
    },
];

/// Applies every migration in [`MIGRATIONS`] not yet recorded in
/// `schema_migrations`, each inside its own transaction.
///
/// # Errors
/// Returns a [`rusqlite::Error`] if any migration statement fails; the
/// migration's transaction is rolled back, leaving the schema at the last
/// successfully applied version.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;
    for migration in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE id = ?1)",
            [migration.id],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }
        let txn: Transaction<'_> = conn.transaction()?;
        for statement in migration.statements {
            txn.execute_batch(statement)?;
        }
        txn.execute(
            "INSERT INTO schema_migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.id, migration.name, crate::store::now_rfc3339()],
        )?;
        txn.commit()?;
    }
    Ok(())
}
