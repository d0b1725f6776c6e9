// conductor-config/src/lib.rs
// ============================================================================
// Module: Conductor Config Library
// Description: The §6.4 environment/configuration model, TOML loading with
//              environment-variable overrides, and fail-closed validation.
// Purpose: Single source of truth for `conductor.toml` semantics.
// Dependencies: serde, toml, thiserror
// ============================================================================

//! ## Overview
//! `conductor-config` defines one [`ConductorConfig`] struct covering every
//! operational knob named in §6.4: per-role agent timeouts, per-queue lease
//! durations and retry policy, comment rate limiting with a priority-bypass
//! list, retention windows, sensitive-path/protected-file patterns, and the
//! `run_tests` command allowlist. Loading is strict: unknown keys and
//! out-of-range values fail at process start, never mid-run, mirroring the
//! teacher's `decision-gate-config` crate's schema-validated TOML model.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod schema;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AgentTimeouts;
pub use config::CommentRateLimit;
pub use config::ConductorConfig;
pub use config::ConfigError;
pub use config::QueueSettings;
pub use config::RetentionSettings;
pub use config::SandboxSettings;
pub use config::load_from_str;
pub use config::load_from_toml_with_env;
