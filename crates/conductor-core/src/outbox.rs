// crates/conductor-core/src/outbox.rs
// ============================================================================
// Module: External-Effects Outbox
// Description: Idempotent, exactly-once GitHub side effects (§4.6 Outbox Worker).
// Purpose: Model the GitHubWrite row, its status machine, and the marker pattern.
// Dependencies: serde, serde_json
// ============================================================================

use crate::hashing::HashAlgorithm;
use crate::hashing::deterministic_key;
use crate::hashing::hash_canonical_json;
use crate::ids::GitHubWriteId;
use crate::ids::IdempotencyKey;
use crate::ids::RunId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Write Kind
// ============================================================================

/// The kinds of external write the outbox performs (§4.6, §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitHubWriteKind {
    /// Opens the pull request for a run.
    CreatePr,
    /// Updates the body of an already-opened pull request.
    UpdatePrDescription,
    /// Posts a mirrored comment (progress note, error, question).
    PostComment,
    /// Updates a commit status / check run.
    UpdateStatusCheck,
    /// Requests review from the configured reviewers on an open PR.
    RequestReview,
}

impl GitHubWriteKind {
    /// Returns the canonical string used in idempotency keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePr => "create_pr",
            Self::UpdatePrDescription => "update_pr_description",
            Self::PostComment => "post_comment",
            Self::UpdateStatusCheck => "update_status_check",
            Self::RequestReview => "request_review",
        }
    }
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of an outbox row (§4.6 "Status transitions").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitHubWriteStatus {
    /// Waiting to be attempted.
    Queued,
    /// Claimed by a worker; request in flight or already sent.
    Processing,
    /// Definitively succeeded; `github_id`/`github_number`/`github_url` captured.
    Sent,
    /// Definitively failed (4xx or validation error); will not be retried.
    Failed,
    /// Network failure after the request may have reached the host; needs
    /// the recovery scan to resolve.
    Ambiguous,
    /// Administratively cancelled; terminal.
    Cancelled,
}

/// Returns whether `from -> to` is a legal outbox status transition
/// (§4.6 "Status transitions").
#[must_use]
pub fn is_allowed_status_transition(from: GitHubWriteStatus, to: GitHubWriteStatus) -> bool {
    use GitHubWriteStatus::{Ambiguous, Cancelled, Failed, Processing, Queued, Sent};

    matches!(
        (from, to),
        (Queued, Processing)
            | (Processing, Sent)
            | (Processing, Failed)
            | (Processing, Ambiguous)
            | (Ambiguous, Sent)
            | (Ambiguous, Queued)
            | (Queued, Cancelled)
            | (Processing, Cancelled)
            | (Ambiguous, Cancelled)
    )
}

// ============================================================================
// SECTION: GitHub Write
// ============================================================================

/// One outbox row (§3 GitHubWrite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubWrite {
    /// Primary key.
    pub github_write_id: GitHubWriteId,
    /// The run this write is on behalf of.
    pub run_id: RunId,
    /// Which kind of write this is.
    pub kind: GitHubWriteKind,
    /// The host-side node this write targets (PR node id, issue node id, ...).
    pub target_node_id: String,
    /// Deterministic dedup key; see [`compute_idempotency_key`].
    pub idempotency_key: IdempotencyKey,
    /// The payload to send, before marker embedding.
    pub payload: Value,
    /// Hex-encoded SHA-256 of the canonicalized `payload`.
    pub payload_hash: String,
    /// Current lifecycle status.
    pub status: GitHubWriteStatus,
    /// Host-assigned opaque id, once sent.
    pub github_id: Option<String>,
    /// Host-assigned number (PR/issue number), once sent and applicable.
    pub github_number: Option<i64>,
    /// Host-assigned canonical URL, once sent.
    pub github_url: Option<String>,
    /// Number of attempts made so far.
    pub retry_count: u32,
}

/// Computes the deterministic idempotency key for a logical write
/// (§4.6 "Idempotency key"): `sha256(kind:target_node_id:payload_hash)`.
#[must_use]
pub fn compute_idempotency_key(kind: GitHubWriteKind, target_node_id: &str, payload_hash: &str) -> String {
    deterministic_key(&[kind.as_str(), target_node_id, payload_hash])
}

/// Computes the SHA-256 payload hash over canonicalized JSON
/// (§6.2 "Computes `payload_hash` over a canonicalized payload").
///
/// # Errors
/// Returns an error if `payload` fails JSON canonicalization.
pub fn compute_payload_hash(payload: &Value) -> Result<String, crate::hashing::HashError> {
    Ok(hash_canonical_json(HashAlgorithm::Sha256, payload)?.value)
}

// ============================================================================
// SECTION: Marker
// ============================================================================

/// The hidden, machine-readable marker embedded in every rendered write body
/// (§4.6 "Marker pattern").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMarker {
    /// The outbox row this marker identifies.
    pub github_write_id: GitHubWriteId,
    /// The payload hash this marker attests to.
    pub payload_hash: String,
}

/// Prefix used to delimit the hidden marker line so it can be located and
/// stripped from rendered bodies without affecting visible content.
pub const MARKER_PREFIX: &str = "<!-- conductor:write ";
/// Suffix closing the hidden marker line.
pub const MARKER_SUFFIX: &str = " -->";

impl WriteMarker {
    /// Renders this marker as a hidden HTML-comment line.
    ///
    /// # Panics
    /// Never panics: `WriteMarker` serializes to a JSON object unconditionally.
    #[must_use]
    pub fn render(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{MARKER_PREFIX}{json}{MARKER_SUFFIX}")
    }

    /// Extracts and parses a marker from rendered body text, if present.
    #[must_use]
    pub fn extract(body: &str) -> Option<Self> {
        let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
        let rest = &body[start..];
        let end = rest.find(MARKER_SUFFIX)?;
        serde_json::from_str(&rest[..end]).ok()
    }

    /// Verifies this marker matches the expected write id and payload hash
    /// (§4.6 "verifies BOTH fields match before promoting to `sent`").
    ///
    /// Unverified markers — including ones whose `github_write_id` matches
    /// but whose `payload_hash` does not — MUST NOT be accepted
    /// (§8 "Boundary behaviors").
    #[must_use]
    pub fn verifies(&self, expected_write_id: &GitHubWriteId, expected_payload_hash: &str) -> bool {
        &self.github_write_id == expected_write_id && self.payload_hash == expected_payload_hash
    }
}
