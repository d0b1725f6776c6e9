//! `SQLite` crash writer for event-append durability tests.
// conductor-store-sqlite/src/bin/sqlite_crash_writer.rs
// ============================================================================
// Binary: SQLite Crash Writer
// Description: Opens a store, begins appending an event, then aborts the
//              process before the transaction commits.
// Purpose: Support durability tests asserting that a crash mid-append never
//          leaves a partially-written event or an advanced `next_sequence`
//          behind (run the binary, then reopen the same path and assert the
//          run's `next_sequence` is unchanged and the event is absent).
// Dependencies: conductor-core, conductor-store-sqlite, rusqlite
// ============================================================================

use std::env;
use std::path::PathBuf;

use conductor_store_sqlite::SqliteStore;
use conductor_store_sqlite::SqliteStoreConfig;
use conductor_store_sqlite::SqliteStoreMode;
use conductor_store_sqlite::SqliteSyncMode;
use conductor_store_sqlite::now_rfc3339;
use rusqlite::params;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let path = args.next().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing sqlite path"))?;
    let run_id = args.next().unwrap_or_else(|| "run_crash_1".to_string());
    let path = PathBuf::from(path);

    let config = SqliteStoreConfig {
        path: path.clone(),
        mode: SqliteStoreMode::Wal,
        sync: SqliteSyncMode::Full,
        busy_timeout_ms: 1_000,
    };
    // Runs migrations and seeds the schema; dropped immediately so the raw
    // connection below is the only open handle when we abort.
    drop(SqliteStore::open(config)?);

    let conn = rusqlite::Connection::open(&path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;

    conn.execute(
        "INSERT INTO projects (project_id, name, created_at) VALUES ('proj_1','crash-test',?1)",
        params![now_rfc3339()],
    )?;
    conn.execute(
        "INSERT INTO repos (repo_id, project_id, full_name, default_branch, created_at) VALUES ('repo_1','proj_1','o/r','main',?1)",
        params![now_rfc3339()],
    )?;
    conn.execute(
        "INSERT INTO tasks (task_id, project_id, repo_id, external_node_id, display_slug, title, created_at)
         VALUES ('task_1','proj_1','repo_1','node_1','crash-test-task','crash test task',?1)",
        params![now_rfc3339()],
    )?;
    conn.execute(
        "INSERT INTO runs (run_id, task_id, project_id, repo_id, run_number, phase, step, base_branch, created_at, updated_at)
         VALUES (?1,'task_1','proj_1','repo_1',1,'pending','plan','main',?2,?2)",
        params![run_id, now_rfc3339()],
    )?;

    // Begin the same two-step sequence allocation append_event uses, then
    // abort before committing: the WAL must not retain this transaction.
    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE runs SET next_sequence = next_sequence + 1 WHERE run_id = ?1 AND next_sequence = 1", params![run_id])?;
    tx.execute(
        "INSERT INTO events (event_id, project_id, run_id, task_id, repo_id, event_type, class, payload_json,
            sequence, idempotency_key, source, created_at)
         VALUES ('evt_crash','proj_1',?1,'task_1','repo_1','crash.test','fact','{}',1,'idem_crash','system',?2)",
        params![run_id, now_rfc3339()],
    )?;

    // Simulate a crash: the OS process dies mid-transaction. `tx` is never
    // committed, so SQLite must roll it back on next open.
    std::process::abort();
}
