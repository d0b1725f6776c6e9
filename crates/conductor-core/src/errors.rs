// crates/conductor-core/src/errors.rs
// ============================================================================
// Module: Core Error Taxonomy
// Description: Stable error kinds shared by every Conductor crate boundary.
// Purpose: Let callers branch on `kind()`, never on Display text.
// Dependencies: thiserror
// ============================================================================

//! Every public-boundary error enum in the workspace (`CoreError`,
//! `StoreError`, `SandboxError`, `OutboxError`, `WorkerError`, ...) maps its
//! variants 1:1 onto the rows of [`ErrorKind`]. This mirrors the teacher's
//! `ToolCallError::code` convention: the `Display` string is for humans and
//! logs, `kind()` is for control flow.

use thiserror::Error;

// ============================================================================
// SECTION: Error Kind Taxonomy
// ============================================================================

/// Stable, coarse error classification used for recovery decisions.
///
/// Origin and recovery strategy per kind:
/// - `Transient`: DB serialization conflict, network blip, rate limit —
///   exponential backoff, retry up to `max_attempts`.
/// - `StaleJob`: run advanced past the job's expected phase/step/sequence —
///   drop silently, log at info.
/// - `StaleTransition`: optimistic-lock miss on the phase CAS — drop the
///   transition, nothing mutated so no rollback is needed.
/// - `AgentFailure`: provider error, timeout, or invalid agent output —
///   record an `agent.failed` decision and block with context.
/// - `PolicyBlock`: a rule tripped at tool invocation or pre-push — fail
///   the tool call only, or block the run and offer an exception.
/// - `ArtifactInvalid`: schema or reference check failed — one retry, then
///   block on repeat.
/// - `AmbiguousWrite`: network failure mid-send to GitHub — mark ambiguous,
///   the recovery scan resolves it later.
/// - `Fatal`: storage full, corrupt data — surface to the operator, block
///   affected runs, never silently corrupt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recoverable by retrying with backoff.
    Transient,
    /// The job's expected run state has already moved on.
    StaleJob,
    /// The phase CAS precondition did not hold.
    StaleTransition,
    /// An agent invocation failed or returned unusable output.
    AgentFailure,
    /// A policy rule blocked a tool call or a phase transition.
    PolicyBlock,
    /// An artifact failed schema or reference validation.
    ArtifactInvalid,
    /// An external write's outcome could not be confirmed.
    AmbiguousWrite,
    /// Unrecoverable; requires operator intervention.
    Fatal,
}

impl ErrorKind {
    /// Returns whether this kind should be retried automatically by a
    /// worker loop rather than surfaced as a blocking run state.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::StaleJob | ErrorKind::StaleTransition)
    }

    /// Returns whether this kind should transition a run to `blocked`.
    #[must_use]
    pub fn blocks_run(self) -> bool {
        matches!(
            self,
            ErrorKind::AgentFailure
                | ErrorKind::PolicyBlock
                | ErrorKind::ArtifactInvalid
                | ErrorKind::Fatal
        )
    }
}

// ============================================================================
// SECTION: Core Error
// ============================================================================

/// Errors surfaced by `conductor-core`'s domain and state-machine logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A requested phase/step transition is not reachable from the run's
    /// current phase.
    #[error("transition from {from} to {to} is not permitted")]
    IllegalTransition {
        /// The run's current phase at the time of the request.
        from: String,
        /// The requested target phase.
        to: String,
    },

    /// The phase CAS precondition (`expected_phase`) did not match the
    /// run's current phase.
    #[error("stale transition: expected phase {expected}, run is at {actual}")]
    StaleTransition {
        /// The phase the caller expected.
        expected: String,
        /// The run's actual current phase.
        actual: String,
    },

    /// A checkpoint's anchor no longer matches the run's current anchor
    /// value (e.g. `head_sha` moved since the checkpoint was recorded).
    #[error("checkpoint {checkpoint} anchor invalidated: expected {expected}, found {found}")]
    CheckpointInvalidated {
        /// Name of the checkpoint being validated.
        checkpoint: String,
        /// The anchor value recorded at checkpoint time.
        expected: String,
        /// The anchor value observed now.
        found: String,
    },

    /// A blocked-retry resolution request named a `prior_phase` that is
    /// not retryable and had no fallback transition target.
    #[error("no retryable prior phase found for run {run_id}")]
    NoRetryablePriorPhase {
        /// Run for which retry resolution failed.
        run_id: String,
    },

    /// A gate condition expression failed to parse or evaluate.
    #[error("gate condition error: {0}")]
    GateCondition(String),

    /// Canonical-JSON hashing failed (should only occur for non-finite
    /// floats or other values the canonicalizer rejects).
    #[error("failed to canonicalize payload for hashing: {0}")]
    Canonicalization(String),
}

impl CoreError {
    /// Maps this error to its stable [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::StaleTransition { .. } => ErrorKind::StaleTransition,
            CoreError::IllegalTransition { .. }
            | CoreError::NoRetryablePriorPhase { .. }
            | CoreError::GateCondition(_) => ErrorKind::Fatal,
            CoreError::CheckpointInvalidated { .. } => ErrorKind::ArtifactInvalid,
            CoreError::Canonicalization(_) => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;
    use super::ErrorKind;

    #[test]
    fn stale_transition_is_retryable_by_dropping() {
        let err = CoreError::StaleTransition {
            expected: "planning".into(),
            actual: "blocked".into(),
        };
        assert_eq!(err.kind(), ErrorKind::StaleTransition);
        assert!(err.kind().is_retryable());
        assert!(!err.kind().blocks_run());
    }

    #[test]
    fn checkpoint_invalidated_is_artifact_invalid() {
        let err = CoreError::CheckpointInvalidated {
            checkpoint: "tests_passed".into(),
            expected: "abc".into(),
            found: "def".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ArtifactInvalid);
        assert!(err.kind().blocks_run());
    }
}
