// conductor-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Store
// Description: Durable SQLite-backed implementation of every conductor-core
//              storage trait (event log, run projection, gates, job queue,
//              outbox, artifacts, policy, worktrees).
// Purpose: Provide production-grade persistence for a Conductor deployment.
// Dependencies: conductor-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a single SQLite-backed [`SqliteStore`] that implements
//! every storage trait `conductor-core` defines. A single `Mutex<Connection>`
//! serializes all access — for an embedded SQLite connection this stands in
//! for the per-run advisory lock described in the orchestration model, since
//! there is never more than one real writer to serialize against. Schema
//! evolution is forward-only numbered migrations tracked in
//! `schema_migrations` (see [`schema`]).

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod schema;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::DEFAULT_BUSY_TIMEOUT_MS;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::now_rfc3339;
pub use store::unix_millis_now;
