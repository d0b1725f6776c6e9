// crates/conductor-core/src/event.rs
// ============================================================================
// Module: Event Log
// Description: Append-only, per-run sequenced event record.
// Purpose: The single source of truth the run projection is derived from.
// Dependencies: serde
// ============================================================================

//! Events are immutable once appended (§4.1). An [`Event`] with a `run_id`
//! carries a `sequence`; one without does not. The invariant
//! `(run_id IS NULL) = (sequence IS NULL)` is enforced by [`Event::new`]
//! returning a type where both are `Option` together, and by the store at
//! the schema level.

use crate::ids::CausationId;
use crate::ids::CorrelationId;
use crate::ids::EventId;
use crate::ids::IdempotencyKey;
use crate::ids::ProjectId;
use crate::ids::RepoId;
use crate::ids::RunId;
use crate::ids::TaskId;
use crate::ids::TxnId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Event Classification
// ============================================================================

/// The three event classes (§3 Event).
///
/// Only [`EventClass::Decision`] may mutate the run projection (§4.2
/// "Authority invariant"). Facts and signals may trigger processing — they
/// emit decision events and enqueue jobs — but never mutate `runs` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// An observation about the outside world (webhook delivery, operator
    /// action intake before interpretation).
    Fact,
    /// The only class allowed to mutate `runs.phase/step/blocked_*/...`.
    Decision,
    /// An internal trigger (timer, scheduler) that causes processing but
    /// carries no projection mutation of its own.
    Signal,
}

/// Where an event originated (§3 Event `source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Delivered by the external host's webhook mechanism.
    GithubWebhook,
    /// Caused by an operator action in the control surface.
    UiAction,
    /// Emitted by a timer/scheduler (janitor sweeps, lease checks).
    Scheduler,
    /// Emitted while an agent invocation was running.
    AgentRuntime,
    /// Internally generated (e.g. derived decision events from fact handling).
    System,
}

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// An immutable row in the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Primary key.
    pub event_id: EventId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning run, if this event is run-scoped.
    pub run_id: Option<RunId>,
    /// Owning task, if applicable.
    pub task_id: Option<TaskId>,
    /// Owning repo, if applicable.
    pub repo_id: Option<RepoId>,
    /// Hierarchical event type, e.g. `phase.transitioned`.
    pub event_type: String,
    /// The event's class.
    pub class: EventClass,
    /// Opaque, type-specific payload.
    pub payload: Value,
    /// Position in the run's total order. `Some` iff `run_id` is `Some`.
    pub sequence: Option<i64>,
    /// Deterministic deduplication key, unique across all events.
    pub idempotency_key: IdempotencyKey,
    /// The event that caused this one to be emitted, if any.
    pub causation_id: Option<CausationId>,
    /// Correlation identifier threaded across a logical request.
    pub correlation_id: Option<CorrelationId>,
    /// Database transaction identifier the insert happened under.
    pub txn_id: Option<TxnId>,
    /// Where the event originated.
    pub source: EventSource,
    /// When the row was inserted. Advisory; never drives ordering.
    pub created_at: Timestamp,
    /// When the orchestrator finished processing this event.
    pub processed_at: Option<Timestamp>,
}

impl Event {
    /// Returns whether this event's projection-mutation rule invariant is
    /// satisfiable: run-scoped events must carry a sequence, and vice versa.
    #[must_use]
    pub fn has_consistent_sequencing(&self) -> bool {
        self.run_id.is_some() == self.sequence.is_some()
    }

    /// Returns whether this event is still awaiting orchestrator processing.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Returns whether this event's class permits it to mutate the run
    /// projection directly (§4.2 "Projection-mutation rule").
    #[must_use]
    pub fn may_mutate_projection(&self) -> bool {
        self.class == EventClass::Decision
    }
}

// ============================================================================
// SECTION: Idempotency Key Recipes
// ============================================================================

/// Deterministic idempotency key recipes for well-known event sources
/// (§4.1 "Idempotency key rule").
pub mod idempotency {
    use crate::hashing::deterministic_key;

    /// Key for a webhook delivery: `sha256(delivery_id:payload_hash)`.
    #[must_use]
    pub fn webhook_delivery(delivery_id: &str, payload_hash: &str) -> String {
        deterministic_key(&["webhook", delivery_id, payload_hash])
    }

    /// Key for an operator action: `sha256(actor_id:run_id:action:nonce)`.
    ///
    /// The nonce is caller-supplied (e.g. a client-generated UUID) so that
    /// distinct clicks of the same action produce distinct events while a
    /// retried HTTP request with the same nonce collapses to one.
    #[must_use]
    pub fn operator_action(actor_id: &str, run_id: &str, action: &str, nonce: &str) -> String {
        deterministic_key(&["operator_action", actor_id, run_id, action, nonce])
    }

    /// Key for an internally derived decision event, scoped to the causing
    /// event so re-processing the same cause never double-emits.
    #[must_use]
    pub fn derived_decision(causation_event_id: &str, decision_type: &str) -> String {
        deterministic_key(&["derived_decision", causation_event_id, decision_type])
    }

    /// Key for a scheduler/timer signal, scoped to the sweep window so
    /// overlapping janitor ticks collapse to one signal event.
    #[must_use]
    pub fn scheduler_signal(signal_type: &str, window_id: &str) -> String {
        deterministic_key(&["scheduler_signal", signal_type, window_id])
    }
}

#[cfg(test)]
mod tests {
    use super::EventClass;
    use super::EventSource;
    use super::Event;
    use crate::ids::EventId;
    use crate::ids::IdempotencyKey;
    use crate::ids::ProjectId;
    use crate::time::Timestamp;
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            event_id: EventId::new("evt_1"),
            project_id: ProjectId::new("proj_1"),
            run_id: None,
            task_id: None,
            repo_id: None,
            event_type: "webhook.received".into(),
            class: EventClass::Fact,
            payload: json!({}),
            sequence: None,
            idempotency_key: IdempotencyKey::new("key_1"),
            causation_id: None,
            correlation_id: None,
            txn_id: None,
            source: EventSource::GithubWebhook,
            created_at: Timestamp::now(),
            processed_at: None,
        }
    }

    #[test]
    fn run_scoped_events_require_sequence() {
        let mut event = sample_event();
        assert!(event.has_consistent_sequencing());
        event.run_id = Some(crate::ids::RunId::new("run_1"));
        assert!(!event.has_consistent_sequencing());
        event.sequence = Some(1);
        assert!(event.has_consistent_sequencing());
    }

    #[test]
    fn only_decision_events_may_mutate_projection() {
        let mut event = sample_event();
        assert!(!event.may_mutate_projection());
        event.class = EventClass::Decision;
        assert!(event.may_mutate_projection());
    }

    #[test]
    fn webhook_idempotency_key_is_deterministic() {
        let k1 = super::idempotency::webhook_delivery("delivery_1", "hash_a");
        let k2 = super::idempotency::webhook_delivery("delivery_1", "hash_a");
        assert_eq!(k1, k2);
        let k3 = super::idempotency::webhook_delivery("delivery_2", "hash_a");
        assert_ne!(k1, k3);
    }
}
