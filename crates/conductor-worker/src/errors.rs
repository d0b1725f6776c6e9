// conductor-worker/src/errors.rs
// ============================================================================
// Module: Worker Error Taxonomy
// Description: The error enum every orchestrator-facing entry point returns.
// Purpose: Let callers (job loops, the HTTP surface, the CLI) branch on
//          `kind()` rather than matching store/provider errors directly.
// Dependencies: conductor-core, conductor-sandbox, conductor-outbox, thiserror
// ============================================================================

use conductor_core::errors::ErrorKind;
use conductor_core::interfaces::CredentialError;
use conductor_core::interfaces::EventStoreError;
use conductor_core::interfaces::GateStoreError;
use conductor_core::interfaces::JobStoreError;
use conductor_core::interfaces::OutboxStoreError;
use conductor_core::interfaces::PolicyStoreError;
use conductor_core::interfaces::RunStoreError;
use conductor_core::interfaces::WorktreeStoreError;
use conductor_core::ids::RunId;
use conductor_core::CoreError;
use conductor_sandbox::SandboxError;
use thiserror::Error;

/// Errors surfaced by the orchestrator's drain loop, job executors, janitor,
/// and HTTP/control surface.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A run named in a job or webhook no longer exists.
    #[error("run not found: {0}")]
    RunNotFound(RunId),
    /// The event log rejected an append/read.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),
    /// The run store rejected a transition.
    #[error("run store error: {0}")]
    RunStore(#[from] RunStoreError),
    /// The gate store rejected a read/write.
    #[error("gate store error: {0}")]
    GateStore(#[from] GateStoreError),
    /// The job store rejected a claim/complete/fail.
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),
    /// The outbox store rejected a read/write.
    #[error("outbox store error: {0}")]
    OutboxStore(#[from] OutboxStoreError),
    /// The policy store rejected a read/write.
    #[error("policy store error: {0}")]
    PolicyStore(#[from] PolicyStoreError),
    /// The worktree store rejected a create/destroy/lease.
    #[error("worktree store error: {0}")]
    WorktreeStore(#[from] WorktreeStoreError),
    /// Credential resolution failed.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    /// A state-machine invariant was violated.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    /// The sandbox rejected a tool call or filesystem operation.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    /// A webhook or job payload could not be parsed into the shape its
    /// handler expected.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// The inbound webhook's `X-Hub-Signature-256` did not verify.
    #[error("webhook signature verification failed")]
    SignatureInvalid,
    /// An operator action was requested against a run in a phase that does
    /// not permit it.
    #[error("action {action} is not permitted while run is in phase {phase}")]
    ActionNotPermitted {
        /// The requested action name.
        action: String,
        /// The run's current phase, for the error message.
        phase: String,
    },
}

impl WorkerError {
    /// Maps this error to its stable [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::EventStore(EventStoreError::Io(_))
            | WorkerError::RunStore(RunStoreError::Io(_))
            | WorkerError::GateStore(GateStoreError::Io(_))
            | WorkerError::JobStore(JobStoreError::Io(_))
            | WorkerError::OutboxStore(OutboxStoreError::Io(_))
            | WorkerError::PolicyStore(PolicyStoreError::Io(_))
            | WorkerError::WorktreeStore(WorktreeStoreError::Io(_))
            | WorkerError::Credential(CredentialError::Unavailable(_) | CredentialError::ExchangeFailed(_)) => {
                ErrorKind::Transient
            }
            WorkerError::RunStore(RunStoreError::StaleTransition { .. }) => ErrorKind::StaleTransition,
            WorkerError::RunNotFound(_)
            | WorkerError::EventStore(EventStoreError::DuplicateIdempotencyKey(_) | EventStoreError::SequenceConflict { .. })
            | WorkerError::JobStore(JobStoreError::DuplicateIdempotencyKey(_) | JobStoreError::NotFoundOrNotOwned(_))
            | WorkerError::OutboxStore(OutboxStoreError::DuplicateIdempotencyKey(_) | OutboxStoreError::NotFound(_))
            | WorkerError::WorktreeStore(WorktreeStoreError::AlreadyActive(_) | WorktreeStoreError::PortExhausted)
            | WorkerError::GateStore(GateStoreError::CausationEventMissing(_)) => ErrorKind::StaleJob,
            WorkerError::Core(core) => core.kind(),
            WorkerError::Sandbox(sandbox) => sandbox.kind(),
            WorkerError::MalformedPayload(_) | WorkerError::ActionNotPermitted { .. } => ErrorKind::ArtifactInvalid,
            WorkerError::SignatureInvalid => ErrorKind::PolicyBlock,
        }
    }
}
