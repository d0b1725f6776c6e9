// system-tests/src/lib.rs
// ============================================================================
// Module: Conductor System Tests Library
// Description: Shared fixtures for the end-to-end scenarios under `tests/`.
// Purpose: Build a fully wired `ConductorContext` (real SQLite store, fake
//          GitHub client, static credentials) without booting a subprocess,
//          so scenarios drive the actual HTTP router and worker code in
//          process.
// Dependencies: conductor-core, conductor-providers, conductor-store-sqlite,
//               conductor-worker
// ============================================================================

//! ## Overview
//! Every scenario in this crate exercises Conductor's own `axum` router and
//! job-store plumbing directly — no shell-out to the `conductor` binary, no
//! network. `fixtures::test_context` is the one place that topology is
//! assembled, so every scenario starts from the same shape a real deployment
//! would: `ConductorContext::open` over an in-memory `SqliteStore`.

pub mod fixtures;
