// crates/conductor-core/src/artifact.rs
// ============================================================================
// Module: Artifact
// Description: Append-only, versioned run artifacts (plans, test reports, reviews).
// Purpose: Model §3 Artifact's version-per-(run_id, type) invariant.
// Dependencies: serde
// ============================================================================

use crate::ids::ArtifactId;
use crate::ids::RunId;
use crate::time::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Artifact Kind & Validation
// ============================================================================

/// The kinds of artifact a run produces (§3 Artifact `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The planner's proposed change description.
    Plan,
    /// The test runner's structured report.
    TestReport,
    /// A reviewer's structured findings.
    Review,
}

/// Outcome of validating an artifact's content against its expected schema
/// and references (§4.7, §7 "Artifact invalid").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Not yet validated.
    Pending,
    /// Schema and reference checks passed.
    Valid,
    /// Schema or reference checks failed.
    Invalid,
}

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// An immutable, versioned artifact produced during a run (§3 Artifact).
///
/// `version` increments per `(run_id, type)`; artifacts are never updated
/// in place, only superseded by a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Primary key.
    pub artifact_id: ArtifactId,
    /// The run that produced this artifact.
    pub run_id: RunId,
    /// Which kind of artifact this is.
    pub kind: ArtifactKind,
    /// 1-indexed version within `(run_id, kind)`.
    pub version: u32,
    /// The artifact's immutable content.
    pub content: serde_json::Value,
    /// SHA-256 of the canonicalized content.
    pub checksum_sha256: String,
    /// Current validation status.
    pub validation_status: ValidationStatus,
    /// When this version was recorded.
    pub created_at: Timestamp,
}

impl Artifact {
    /// Returns whether this artifact passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_status == ValidationStatus::Valid
    }
}

/// Returns the most recent artifact of `kind` for a run, by `version`
/// (§3 "`version` increments per `(run_id, type)`").
#[must_use]
pub fn latest_of_kind(artifacts: &[Artifact], kind: ArtifactKind) -> Option<&Artifact> {
    artifacts
        .iter()
        .filter(|artifact| artifact.kind == kind)
        .max_by_key(|artifact| artifact.version)
}
