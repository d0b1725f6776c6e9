// crates/conductor-core/src/ids.rs
// ============================================================================
// Module: Conductor Identifiers
// Description: Canonical opaque identifiers for Conductor entities.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque ULID/UUID strings on the wire (§3: "All entities
//! share ULID/UUID keys"). This module never generates identifiers itself —
//! callers (the store, or the orchestrator) mint them — so the core stays
//! deterministic and replay-safe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Opaque Id Macro
// ============================================================================

/// Declares an opaque, string-backed identifier type with the standard
/// `new`/`as_str`/`Display`/`From<&str>`/`From<String>` surface used
/// throughout the data model.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// SECTION: Entity Identifiers
// ============================================================================

opaque_id! {
    /// Project identifier. Primary key for `projects`.
    ProjectId
}
opaque_id! {
    /// Repo identifier. Primary key for `repos`.
    RepoId
}
opaque_id! {
    /// Task identifier — stable, internal primary key used for all joins.
    ///
    /// # Invariants
    /// - Never derived from the external display slug; that is display-only.
    TaskId
}
opaque_id! {
    /// Stable external node id used for cross-system task deduplication.
    ExternalTaskNodeId
}
opaque_id! {
    /// User identifier for operators/viewers/admins.
    UserId
}
opaque_id! {
    /// Session identifier for an authenticated operator session.
    SessionId
}
opaque_id! {
    /// Run identifier. A run is a single execution attempt against a task.
    RunId
}
opaque_id! {
    /// Event identifier. Primary key for the append-only event log.
    EventId
}
opaque_id! {
    /// Gate evaluation identifier.
    ///
    /// # Invariants
    /// - Used as the lexicographic tie-breaker when two evaluations share a
    ///   causation event sequence (§3 "Latest" ordering rule).
    GateEvalId
}
opaque_id! {
    /// Gate identifier, scoped to a run's routing decision.
    GateId
}
opaque_id! {
    /// Durable job queue row identifier.
    JobId
}
opaque_id! {
    /// Outbox row identifier (one external GitHub write).
    GitHubWriteId
}
opaque_id! {
    /// Worktree identifier.
    WorktreeId
}
opaque_id! {
    /// Port lease identifier.
    PortLeaseId
}
opaque_id! {
    /// Artifact identifier.
    ArtifactId
}
opaque_id! {
    /// Policy set snapshot identifier.
    PolicySetId
}
opaque_id! {
    /// Policy violation identifier.
    PolicyViolationId
}
opaque_id! {
    /// Evidence identifier (encrypted-store pointer for a policy violation).
    EvidenceId
}
opaque_id! {
    /// Operator-granted policy override identifier.
    OverrideId
}
opaque_id! {
    /// Agent invocation identifier (one planner/implementer/reviewer/tester call).
    AgentInvocationId
}
opaque_id! {
    /// Routing decision identifier (required/optional gates captured at routing time).
    RoutingDecisionId
}
opaque_id! {
    /// Correlation identifier threaded across events, jobs, and dispatch.
    CorrelationId
}
opaque_id! {
    /// The event id an event's `causation_id` points back to, when it was
    /// itself emitted as a consequence of processing another event.
    CausationId
}
opaque_id! {
    /// Deterministic idempotency key, unique across all events (or jobs, or writes).
    IdempotencyKey
}
opaque_id! {
    /// Database transaction identifier, recorded for audit correlation.
    TxnId
}
