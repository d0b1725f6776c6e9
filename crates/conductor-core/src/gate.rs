// crates/conductor-core/src/gate.rs
// ============================================================================
// Module: Gate Evaluator
// Description: Append-only GateEvaluation records and the derived "latest"
//              projection rule (§4.3 Gate Evaluator).
// Purpose: Let phase advancement consult derived gate state without ever
//          storing gate state on the run itself.
// Dependencies: serde
// ============================================================================

//! Gate state is never stored on `runs` (§4.3 "Gate state is **not** stored
//! on the run"). [`latest_per_gate`] is the one place that projects a list
//! of evaluations down to "current status per gate id", and every caller
//! (routing, the web API, tests) goes through it rather than re-deriving
//! the ordering rule.

use std::collections::HashMap;

use crate::ids::GateEvalId;
use crate::ids::GateId;
use crate::ids::RunId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Gate Status
// ============================================================================

/// Outcome of one gate evaluation (§3 GateEvaluation `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Evaluated but not yet resolved (condition evaluated to unknown).
    Pending,
    /// The gate's condition holds.
    Passed,
    /// The gate's condition does not hold.
    Failed,
}

// ============================================================================
// SECTION: Gate Evaluation
// ============================================================================

/// One append-only gate evaluation record (§3 GateEvaluation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEvaluation {
    /// Primary key.
    pub gate_evaluation_id: GateEvalId,
    /// The run this evaluation belongs to.
    pub run_id: RunId,
    /// Which gate this evaluates.
    pub gate_id: GateId,
    /// The outcome.
    pub status: GateStatus,
    /// The sequence of the event that triggered this evaluation. Used, not
    /// `evaluated_at`, to order evaluations — see [`latest_per_gate`].
    pub causation_event_sequence: i64,
    /// Free-form evaluation detail (which conditions passed/failed, evidence
    /// snapshot consulted, etc.).
    pub details: Value,
    /// Informational only; never used for ordering
    /// (§3 "`evaluated_at` is informational").
    pub evaluated_at: Timestamp,
}

/// Projects a list of evaluations down to the current status per gate id
/// (§4.3 "Derived run-level gate map").
///
/// "Latest" per `gate_id` is the evaluation with the largest
/// `causation_event_sequence`, ties broken by `gate_evaluation_id`
/// lexicographically (§3 GateEvaluation).
#[must_use]
pub fn latest_per_gate(evaluations: &[GateEvaluation]) -> HashMap<GateId, GateStatus> {
    let mut latest: HashMap<GateId, &GateEvaluation> = HashMap::new();
    for evaluation in evaluations {
        match latest.get(&evaluation.gate_id) {
            None => {
                latest.insert(evaluation.gate_id.clone(), evaluation);
            }
            Some(current) if is_later(evaluation, current) => {
                latest.insert(evaluation.gate_id.clone(), evaluation);
            }
            Some(_) => {}
        }
    }
    latest.into_iter().map(|(gate_id, evaluation)| (gate_id, evaluation.status)).collect()
}

/// Returns whether `candidate` supersedes `incumbent` under the causation
/// sequence + id tie-break ordering.
fn is_later(candidate: &GateEvaluation, incumbent: &GateEvaluation) -> bool {
    match candidate.causation_event_sequence.cmp(&incumbent.causation_event_sequence) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.gate_evaluation_id > incumbent.gate_evaluation_id,
    }
}

// ============================================================================
// SECTION: Routing Decision
// ============================================================================

/// Required vs optional gates captured at routing time
/// (§4.3 "Required vs optional gates per run").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The run this decision applies to.
    pub run_id: RunId,
    /// Gates that must be [`GateStatus::Passed`] for advancement.
    pub required_gates: Vec<GateId>,
    /// Gates that are evaluated and recorded but do not block advancement.
    pub optional_gates: Vec<GateId>,
    /// When this routing decision was captured.
    pub decided_at: Timestamp,
}

impl RoutingDecision {
    /// Returns whether every required gate has passed, given the derived
    /// gate map for this run.
    #[must_use]
    pub fn required_gates_satisfied(&self, gate_map: &HashMap<GateId, GateStatus>) -> bool {
        self.required_gates
            .iter()
            .all(|gate_id| gate_map.get(gate_id) == Some(&GateStatus::Passed))
    }
}
