// conductor-worker/src/webhook.rs
// ============================================================================
// Module: GitHub Webhook Handler
// Description: Verifies, deduplicates, and persists inbound GitHub webhook
//              deliveries as fact events (§6.2 Wire Boundary).
// Purpose: The only place an external delivery enters the event log; it
//          never mutates a run directly and never emits a decision.
// Dependencies: axum, hmac, sha2, subtle, conductor-core
// ============================================================================

//! ## Overview
//! `POST /webhooks/github/{project_id}` verifies `X-Hub-Signature-256`
//! against a per-project secret resolved through the same
//! [`conductor_core::interfaces::CredentialProvider`] seam the outbox uses
//! for write tokens, then appends one `Fact`-class event keyed by
//! `X-GitHub-Delivery` and returns `202 Accepted` immediately — processing
//! happens asynchronously off the event log, never inline with the request.
//! A bad signature is rejected with `401` and logged; it is never silently
//! dropped.

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use conductor_core::event::Event;
use conductor_core::event::EventClass;
use conductor_core::event::EventSource;
use conductor_core::event::idempotency::webhook_delivery;
use conductor_core::hashing::HashAlgorithm;
use conductor_core::hashing::hash_bytes;
use conductor_core::ids::EventId;
use conductor_core::ids::IdempotencyKey;
use conductor_core::ids::ProjectId;
use conductor_core::interfaces::EventStoreError;
use conductor_core::time::Timestamp;
use hmac::Hmac;
use hmac::Mac;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::info;
use tracing::warn;
use ulid::Ulid;

use crate::context::ConductorContext;

/// Response body for an accepted webhook delivery.
#[derive(Debug, Serialize)]
struct Accepted {
    /// The event id the delivery was persisted as.
    event_id: String,
}

/// Handles `POST /webhooks/github/{project_id}`.
pub async fn receive_github_webhook(
    State(ctx): State<ConductorContext>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let project_id = ProjectId::new(project_id);
    let delivery_id = headers.get("x-github-delivery").and_then(|value| value.to_str().ok()).unwrap_or_default();
    let event_type = headers.get("x-github-event").and_then(|value| value.to_str().ok()).unwrap_or("unknown").to_string();
    let signature_header = headers.get("x-hub-signature-256").and_then(|value| value.to_str().ok());

    let Some(signature_header) = signature_header else {
        warn!(project_id = %project_id, "webhook rejected: missing signature header");
        return (StatusCode::UNAUTHORIZED, "missing X-Hub-Signature-256").into_response();
    };

    let secret = match ctx.credentials.resolve(&project_id, "webhook_secret") {
        Ok(credential) => credential.token,
        Err(err) => {
            warn!(project_id = %project_id, error = %err, "webhook rejected: no secret configured for project");
            return (StatusCode::UNAUTHORIZED, "unknown project").into_response();
        }
    };

    if !verify_signature(secret.as_bytes(), &body, signature_header) {
        warn!(project_id = %project_id, delivery_id, "webhook rejected: signature did not verify");
        return (StatusCode::UNAUTHORIZED, "signature verification failed").into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(project_id = %project_id, delivery_id, error = %err, "webhook payload was not valid json");
            return (StatusCode::BAD_REQUEST, "malformed json body").into_response();
        }
    };

    let payload_hash = hash_bytes(HashAlgorithm::Sha256, &body).value;
    let idempotency_key = IdempotencyKey::new(webhook_delivery(delivery_id, &payload_hash));

    let event = Event {
        event_id: EventId::new(Ulid::new().to_string()),
        project_id: project_id.clone(),
        run_id: None,
        task_id: None,
        repo_id: None,
        event_type: format!("github.{event_type}"),
        class: EventClass::Fact,
        payload,
        sequence: None,
        idempotency_key,
        causation_id: None,
        correlation_id: None,
        txn_id: None,
        source: EventSource::GithubWebhook,
        created_at: Timestamp::now(),
        processed_at: None,
    };

    match ctx.events.append_event(event) {
        Ok(stored) => {
            info!(project_id = %project_id, delivery_id, event_id = %stored.event_id, "webhook delivery accepted");
            (StatusCode::ACCEPTED, Json(Accepted { event_id: stored.event_id.to_string() })).into_response()
        }
        Err(EventStoreError::DuplicateIdempotencyKey(key)) => {
            info!(project_id = %project_id, delivery_id, idempotency_key = %key, "webhook delivery already recorded");
            (StatusCode::ACCEPTED, Json(Accepted { event_id: key.to_string() })).into_response()
        }
        Err(err) => {
            warn!(project_id = %project_id, delivery_id, error = %err, "failed to persist webhook delivery");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to persist delivery").into_response()
        }
    }
}

/// Verifies `signature_header` (the literal `X-Hub-Signature-256` value,
/// `sha256=<hex>`) against an HMAC-SHA256 of `body` keyed by `secret`, in
/// constant time.
fn verify_signature(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let Some(provided_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex_decode(provided_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.len() == provided.len() && bool::from(expected.as_slice().ct_eq(&provided))
}

/// Decodes a hex string into bytes. Returns `Err` on odd length or a
/// non-hex digit; never panics.
fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let digits = hex.as_bytes();
    for pair in digits.chunks_exact(2) {
        let high = hex_digit(pair[0]).ok_or(())?;
        let low = hex_digit(pair[1]).ok_or(())?;
        bytes.push((high << 4) | low);
    }
    Ok(bytes)
}

/// Parses one ASCII hex digit.
fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
