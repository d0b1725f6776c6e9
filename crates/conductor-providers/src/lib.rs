// conductor-providers/src/lib.rs
// ============================================================================
// Module: Conductor Providers Library
// Description: External GitHub client and credential resolution.
// Purpose: Supply the outbox worker's `GitHubClient` and the orchestrator's
//          `CredentialProvider`, the two edges where Conductor talks to the
//          outside world over HTTP.
// Dependencies: crate::{credentials, github}
// ============================================================================

//! ## Overview
//! Nothing in `conductor-core` performs I/O; this crate is one of the two
//! places that do (`conductor-sandbox` is the other, for the local
//! filesystem/process boundary). Everything here is reachable only through
//! the traits it implements — `conductor-core::interfaces::CredentialProvider`
//! and the [`github::GitHubClient`] trait defined locally, since
//! `conductor-core` has no opinion on the shape of a GitHub write response.

pub mod credentials;
pub mod github;

pub use credentials::CredentialError;
pub use credentials::InstallationTokenCache;
pub use credentials::StaticCredentialProvider;
pub use github::FakeGitHubClient;
pub use github::GitHubApiError;
pub use github::GitHubClient;
pub use github::GitHubWriteRequest;
pub use github::GitHubWriteResponse;
pub use github::HttpGitHubClient;
pub use github::HttpGitHubClientConfig;
