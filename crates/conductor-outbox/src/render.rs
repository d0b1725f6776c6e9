// crates/conductor-outbox/src/render.rs
// ============================================================================
// Module: Write Rendering
// Description: Renders a `GitHubWrite` row into the request body the
//              `GitHubClient` sends, embedding the hidden marker comment.
// Purpose: Keep marker embedding in exactly one place (§4.6 "Marker pattern").
// Dependencies: conductor-core, conductor-providers
// ============================================================================

use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteKind;
use conductor_core::outbox::WriteMarker;
use conductor_providers::GitHubWriteRequest;
use serde_json::Value;
use serde_json::json;

/// Kinds whose payload carries a visible body that the marker comment can be
/// appended to. The other kinds (`update_status_check`, `request_review`)
/// have no free-text body, so they carry no marker and are never eligible
/// for the ambiguous-recovery comment scan.
#[must_use]
pub fn carries_marker(kind: GitHubWriteKind) -> bool {
    matches!(kind, GitHubWriteKind::CreatePr | GitHubWriteKind::UpdatePrDescription | GitHubWriteKind::PostComment)
}

/// Renders `write`'s payload into the body the [`conductor_providers::GitHubClient`]
/// will send, embedding the marker at the end of the visible body for
/// marker-bearing kinds.
#[must_use]
pub fn render_body(write: &GitHubWrite) -> Value {
    if !carries_marker(write.kind) {
        return write.payload.clone();
    }
    let marker = WriteMarker {
        github_write_id: write.github_write_id.clone(),
        payload_hash: write.payload_hash.clone(),
    };
    let rendered_marker = marker.render();
    let mut payload = write.payload.clone();
    if let Some(object) = payload.as_object_mut() {
        let field = match write.kind {
            GitHubWriteKind::CreatePr | GitHubWriteKind::UpdatePrDescription => "body",
            GitHubWriteKind::PostComment => "body",
            GitHubWriteKind::UpdateStatusCheck | GitHubWriteKind::RequestReview => return payload,
        };
        let existing = object.get(field).and_then(Value::as_str).unwrap_or_default();
        object.insert(field.to_string(), json!(format!("{existing}\n\n{rendered_marker}")));
    }
    payload
}

/// Builds the full request the outbox worker hands to the [`GitHubClient`],
/// given the rendered body and a resolved credential token.
#[must_use]
pub fn build_request(write: &GitHubWrite, credential_token: String) -> GitHubWriteRequest {
    GitHubWriteRequest {
        kind: write.kind,
        target_node_id: write.target_node_id.clone(),
        body: render_body(write),
        credential_token,
    }
}
