// conductor-worker/src/context.rs
// ============================================================================
// Module: Conductor Context
// Description: The shared handle bundle constructed once at process start
//              and cloned into every job loop, HTTP handler, and CLI
//              invocation (§2 "Process topology").
// Purpose: Give every entry point the same storage, credential, and GitHub
//          client seam without threading eight constructor arguments
//          through each call site.
// Dependencies: conductor-core, conductor-config, conductor-providers,
//              conductor-store-sqlite
// ============================================================================

use std::sync::Arc;

use conductor_config::ConductorConfig;
use conductor_core::interfaces::ArtifactStore;
use conductor_core::interfaces::CredentialProvider;
use conductor_core::interfaces::EventStore;
use conductor_core::interfaces::GateStore;
use conductor_core::interfaces::JobStore;
use conductor_core::interfaces::OutboxStore;
use conductor_core::interfaces::PolicyStore;
use conductor_core::interfaces::RunStore;
use conductor_core::interfaces::WorktreeStore;
use conductor_providers::GitHubClient;
use conductor_store_sqlite::SqliteStore;
use conductor_store_sqlite::SqliteStoreConfig;
use conductor_store_sqlite::SqliteStoreError;

use crate::notify::RunWakeRegistry;

/// Every backend handle an orchestrator entry point needs, plus the
/// resolved configuration and the run-wake registry (§2).
///
/// Cloning a `ConductorContext` is cheap: every field is an `Arc` (or, for
/// `config`, a plain value cloned once at startup).
#[derive(Clone)]
pub struct ConductorContext {
    /// Append-only event log.
    pub events: Arc<dyn EventStore>,
    /// Run phase/step projection.
    pub runs: Arc<dyn RunStore>,
    /// Gate evaluations and routing decisions.
    pub gates: Arc<dyn GateStore>,
    /// Durable job queue (run/agent/outbox).
    pub jobs: Arc<dyn JobStore>,
    /// External-effects outbox.
    pub outbox: Arc<dyn OutboxStore>,
    /// Produced artifacts (PLAN, diffs, test reports, review notes).
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Policy sets, violations, and operator overrides.
    pub policies: Arc<dyn PolicyStore>,
    /// Worktree leases and port leases.
    pub worktrees: Arc<dyn WorktreeStore>,
    /// Resolves scoped GitHub credentials per project/step.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Performs the outbox's external GitHub writes.
    pub github: Arc<dyn GitHubClient>,
    /// Resolved, validated process configuration.
    pub config: Arc<ConductorConfig>,
    /// Per-run wake handles the drain loop waits on.
    pub wake: Arc<RunWakeRegistry>,
    /// This process's worker id, embedded in job leases and audit records.
    pub worker_id: Arc<str>,
}

impl ConductorContext {
    /// Builds a context backed by one [`SqliteStore`] implementing every
    /// storage trait, plus the supplied GitHub client and credential
    /// provider.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] if the database cannot be opened or
    /// migrated.
    pub fn open(
        sqlite_config: &SqliteStoreConfig,
        config: ConductorConfig,
        github: Arc<dyn GitHubClient>,
        credentials: Arc<dyn CredentialProvider>,
        worker_id: impl Into<Arc<str>>,
    ) -> Result<Self, SqliteStoreError> {
        let store = Arc::new(SqliteStore::open(sqlite_config)?);
        Ok(Self {
            events: store.clone(),
            runs: store.clone(),
            gates: store.clone(),
            jobs: store.clone(),
            outbox: store.clone(),
            artifacts: store.clone(),
            policies: store.clone(),
            worktrees: store,
            credentials,
            github,
            config: Arc::new(config),
            wake: Arc::new(RunWakeRegistry::new()),
            worker_id: worker_id.into(),
        })
    }
}
