// crates/conductor-core/src/policy.rs
// ============================================================================
// Module: Policy Data Model
// Description: Versioned policy snapshots, violations, evidence, and overrides.
// Purpose: The data model consulted by conductor-sandbox's rule engine (§3, §4.7).
// Dependencies: serde
// ============================================================================

//! Rule *evaluation* (path safety, symlink-escape detection, shell-operator
//! detection) lives in `conductor-sandbox`, which is the component that
//! actually mediates tool calls. This module owns only the data Conductor
//! persists about policies, violations, and the overrides operators grant —
//! the shape every crate that touches policy needs to agree on.

use crate::ids::EvidenceId;
use crate::ids::OverrideId;
use crate::ids::PolicySetId;
use crate::ids::PolicyViolationId;
use crate::ids::RunId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Policy Set
// ============================================================================

/// One versioned, immutable policy snapshot (§3 PolicySet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    /// Primary key.
    pub policy_set_id: PolicySetId,
    /// The snapshot this one replaces, if any (§9 "cyclic relational structure").
    pub replaces_policy_set_id: Option<PolicySetId>,
    /// The rule entries in effect for this snapshot.
    pub entries: Vec<PolicySetEntry>,
    /// When this snapshot was created.
    pub created_at: Timestamp,
}

/// One rule within a policy snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySetEntry {
    /// Stable rule name (e.g. `sensitive_file_write`, `shell_operator`).
    pub rule_name: String,
    /// Rule-specific configuration (glob patterns, allowlist entries, ...).
    pub config: serde_json::Value,
    /// Whether this rule is enabled in this snapshot.
    pub enabled: bool,
}

// ============================================================================
// SECTION: Violation & Evidence
// ============================================================================

/// A recorded policy violation (§3 PolicyViolation).
///
/// Raw sensitive content is never stored here; it lives in the separate
/// encrypted [`Evidence`] store with short retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Primary key.
    pub policy_violation_id: PolicyViolationId,
    /// The run this violation occurred on.
    pub run_id: RunId,
    /// The policy snapshot in effect when this violation was recorded.
    pub policy_set_id: PolicySetId,
    /// Which rule tripped.
    pub rule_name: String,
    /// The file path involved, if any.
    pub file_path: Option<String>,
    /// The 1-indexed line range involved, if any.
    pub line_range: Option<(u32, u32)>,
    /// The pattern name that matched, if the rule is pattern-based.
    pub pattern_name: Option<String>,
    /// SHA-256 of the offending content, for correlation with overrides.
    pub content_hash: Option<String>,
    /// Pointer to the encrypted evidence record, if raw content was captured.
    pub evidence_id: Option<EvidenceId>,
    /// When the violation occurred.
    pub occurred_at: Timestamp,
}

/// A pointer into the separate encrypted evidence store (§3 PolicySet/...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Primary key.
    pub evidence_id: EvidenceId,
    /// Opaque locator into the encrypted store (not the content itself).
    pub storage_locator: String,
    /// When this evidence record expires and is purged.
    pub retention_expires_at: Timestamp,
}

// ============================================================================
// SECTION: Override
// ============================================================================

/// The scope an operator-granted exception applies to (§3 Override "scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    /// Applies only to the run that requested it.
    ThisRun,
    /// Applies to every run of the owning task.
    ThisTask,
    /// Applies to every run in the owning repo.
    ThisRepo,
    /// Applies project-wide.
    ProjectWide,
}

/// A constraint narrowing an override so it is never a blanket exception
/// (§3 Override "they are never blanket exceptions").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum OverrideConstraint {
    /// Restricts the override to a specific, exact content hash.
    ContentHash(String),
    /// Restricts the override to a set of allowed paths (glob patterns).
    AllowedPaths(Vec<String>),
    /// Restricts the override to a set of allowed commands.
    AllowedCommands(Vec<String>),
    /// Restricts the override to a set of allowed outbound hosts.
    AllowedHosts(Vec<String>),
}

/// An operator-granted, constrained exception to a policy violation
/// (§3 Override).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    /// Primary key.
    pub override_id: OverrideId,
    /// The violation this override addresses.
    pub policy_violation_id: PolicyViolationId,
    /// How broadly this override applies.
    pub scope: OverrideScope,
    /// The constraint narrowing what the override permits.
    pub constraint: OverrideConstraint,
    /// The operator who granted this override.
    pub granted_by: String,
    /// When this override was granted.
    pub granted_at: Timestamp,
    /// When this override expires, if it is time-bounded.
    pub expires_at: Option<Timestamp>,
}

impl Override {
    /// Returns whether this override, if still active, permits a tool call
    /// against content with the given hash (§8 scenario 4: "constraint=
    /// `content_hash=<h>`").
    #[must_use]
    pub fn permits_content_hash(&self, content_hash: &str, now: Timestamp) -> bool {
        if self.expires_at.is_some_and(|expiry| expiry < now) {
            return false;
        }
        match &self.constraint {
            OverrideConstraint::ContentHash(expected) => expected == content_hash,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Override;
    use super::OverrideConstraint;
    use super::OverrideScope;
    use crate::ids::OverrideId;
    use crate::ids::PolicyViolationId;
    use crate::time::Timestamp;

    fn sample_override(constraint: OverrideConstraint) -> Override {
        Override {
            override_id: OverrideId::new("ovr_1"),
            policy_violation_id: PolicyViolationId::new("pv_1"),
            scope: OverrideScope::ThisRun,
            constraint,
            granted_by: "operator_1".into(),
            granted_at: Timestamp::now(),
            expires_at: None,
        }
    }

    #[test]
    fn content_hash_override_only_matches_exact_hash() {
        let ovr = sample_override(OverrideConstraint::ContentHash("abc123".into()));
        let now = Timestamp::now();
        assert!(ovr.permits_content_hash("abc123", now));
        assert!(!ovr.permits_content_hash("def456", now));
    }

    #[test]
    fn expired_override_never_permits() {
        let mut ovr = sample_override(OverrideConstraint::ContentHash("abc123".into()));
        ovr.expires_at = Some(Timestamp::parse("2020-01-01T00:00:00Z").expect("valid"));
        assert!(!ovr.permits_content_hash("abc123", Timestamp::now()));
    }

    #[test]
    fn non_content_hash_constraint_never_permits_content_hash_check() {
        let ovr = sample_override(OverrideConstraint::AllowedPaths(vec!["src/**".into()]));
        assert!(!ovr.permits_content_hash("anything", Timestamp::now()));
    }
}
