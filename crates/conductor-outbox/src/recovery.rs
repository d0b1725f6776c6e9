// crates/conductor-outbox/src/recovery.rs
// ============================================================================
// Module: Ambiguous Write Recovery
// Description: Resolves `ambiguous` outbox rows via a bounded marker scan.
// Purpose: Recover the true outcome of a write whose network result was
//          unknown, without ever double-creating the same PR/comment
//          (§4.6 "Recovery via marker comments").
// Dependencies: conductor-core, conductor-providers
// ============================================================================

//! ## Overview
//! An `ambiguous` write's request may or may not have reached GitHub. The
//! only safe way to resolve it is to look for the marker this same write
//! would have embedded had it gone through — if found, the write is `sent`
//! (with the id/url recovered from the comment); if not found after a
//! bounded scan, it is safe to retry from `queued` (§8 "Boundary behaviors":
//! a marker that does not verify must never be accepted, so an empty scan
//! is the only other outcome this function returns).

use std::sync::Arc;

use conductor_core::interfaces::OutboxStore;
use conductor_core::interfaces::OutboxStoreError;
use conductor_core::outbox::GitHubWrite;
use conductor_core::outbox::GitHubWriteStatus;
use conductor_core::outbox::WriteMarker;
use conductor_providers::GitHubApiError;
use conductor_providers::GitHubClient;
use thiserror::Error;

use crate::render::carries_marker;

/// Errors from one recovery sweep.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The outbox store rejected a read/write.
    #[error("outbox store error: {0}")]
    OutboxStore(#[from] OutboxStoreError),
}

/// Scans every `ambiguous` write and resolves it to `sent` (marker found,
/// verified) or back to `queued` (scan came up empty) (§4.6 "Recovery
/// scope"). Writes whose kind carries no marker (`update_status_check`,
/// `request_review`) cannot be verified this way and are left `ambiguous`
/// for an operator to resolve manually.
///
/// Returns the number of writes resolved.
///
/// # Errors
/// Returns [`RecoveryError`] on storage failure. A scan failure against the
/// GitHub client for one write is not fatal to the sweep — that write is
/// simply left `ambiguous` for the next sweep.
pub fn recover_ambiguous_writes(
    outbox_store: &Arc<dyn OutboxStore>,
    github_client: &Arc<dyn GitHubClient>,
) -> Result<u64, RecoveryError> {
    let ambiguous = outbox_store.ambiguous_writes()?;
    let mut resolved = 0u64;
    for write in ambiguous {
        if !carries_marker(write.kind) {
            continue;
        }
        if resolve_one(outbox_store, github_client, write)? {
            resolved += 1;
        }
    }
    Ok(resolved)
}

fn resolve_one(
    outbox_store: &Arc<dyn OutboxStore>,
    github_client: &Arc<dyn GitHubClient>,
    write: GitHubWrite,
) -> Result<bool, RecoveryError> {
    let marker = WriteMarker { github_write_id: write.github_write_id.clone(), payload_hash: write.payload_hash.clone() };
    let expected_marker_json = serde_json::to_string(&marker).unwrap_or_default();

    let found = match github_client.find_marker(&write.target_node_id, &expected_marker_json) {
        Ok(found) => found,
        Err(GitHubApiError::Ambiguous(_) | GitHubApiError::RateLimited { .. } | GitHubApiError::Rejected(_)) => {
            return Ok(false);
        }
    };

    match found {
        Some(response) => {
            let sent = GitHubWrite {
                status: GitHubWriteStatus::Sent,
                github_id: Some(response.github_id),
                github_number: response.github_number,
                github_url: Some(response.github_url),
                ..write
            };
            outbox_store.update_status(sent)?;
            Ok(true)
        }
        None => {
            let requeued = GitHubWrite { status: GitHubWriteStatus::Queued, ..write };
            outbox_store.update_status(requeued)?;
            Ok(true)
        }
    }
}
