// system-tests/tests/run_lifecycle.rs
// ============================================================================
// Module: End-to-End Run Lifecycle Scenarios
// Description: Drives the real axum router over a live TCP listener, backed
//              by an in-memory SQLite store, covering webhook ingestion
//              (valid signature, bad signature, duplicate delivery) and the
//              operator control surface's CAS-guarded action dispatch.
// Dependencies: axum, hmac, reqwest, sha2, system-tests::fixtures
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

use std::net::SocketAddr;
use std::sync::Arc;

use conductor_providers::FakeGitHubClient;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use system_tests::fixtures;
use system_tests::fixtures::PROJECT_ID;
use system_tests::fixtures::WEBHOOK_SECRET;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Binds `router` on an ephemeral local port and serves it on a background
/// task. Returns the address to send requests to and a handle the caller
/// must abort once the scenario is done (no graceful-shutdown wiring is
/// needed for a test server).
async fn spawn(router: axum::Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, handle)
}

/// Computes the `X-Hub-Signature-256` value GitHub would send for `body`
/// signed with `secret`.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let tag = mac.finalize().into_bytes();
    let hex: String = tag.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("sha256={hex}")
}

#[tokio::test]
async fn webhook_with_valid_signature_is_accepted_and_replay_is_not_an_error() {
    let scenario = fixtures::test_context(Arc::new(FakeGitHubClient::new(vec![])));
    let router = conductor_worker::router::build_router(scenario.ctx.clone());
    let (addr, handle) = spawn(router).await;

    let body = serde_json::json!({"action": "opened", "pull_request": {"number": 1}});
    let body_bytes = serde_json::to_vec(&body).expect("serialize body");
    let signature = sign(WEBHOOK_SECRET, &body_bytes);
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/webhooks/github/{PROJECT_ID}");

    let first = client
        .post(&url)
        .header("x-hub-signature-256", &signature)
        .header("x-github-event", "pull_request")
        .header("x-github-delivery", "delivery_1")
        .header("content-type", "application/json")
        .body(body_bytes.clone())
        .send()
        .await
        .expect("first delivery sent");
    assert_eq!(first.status(), reqwest::StatusCode::ACCEPTED);

    // The same delivery arriving twice (GitHub's documented at-least-once
    // redelivery) must still be accepted, not rejected or errored.
    let replay = client
        .post(&url)
        .header("x-hub-signature-256", &signature)
        .header("x-github-event", "pull_request")
        .header("x-github-delivery", "delivery_1")
        .header("content-type", "application/json")
        .body(body_bytes)
        .send()
        .await
        .expect("replayed delivery sent");
    assert_eq!(replay.status(), reqwest::StatusCode::ACCEPTED);

    handle.abort();
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_rejected() {
    let scenario = fixtures::test_context(Arc::new(FakeGitHubClient::new(vec![])));
    let router = conductor_worker::router::build_router(scenario.ctx.clone());
    let (addr, handle) = spawn(router).await;

    let body_bytes = serde_json::to_vec(&serde_json::json!({"action": "opened"})).expect("serialize body");
    let signature = sign("not_the_configured_secret", &body_bytes);
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/webhooks/github/{PROJECT_ID}");

    let response = client
        .post(&url)
        .header("x-hub-signature-256", &signature)
        .header("x-github-event", "pull_request")
        .header("x-github-delivery", "delivery_2")
        .header("content-type", "application/json")
        .body(body_bytes)
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    handle.abort();
}

#[tokio::test]
async fn start_run_action_transitions_pending_run_to_planning() {
    let scenario = fixtures::test_context(Arc::new(FakeGitHubClient::new(vec![])));
    fixtures::seed_pending_run(&scenario, "run_lifecycle_1");
    let router = conductor_worker::router::build_router(scenario.ctx.clone());
    let (addr, handle) = spawn(router).await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/runs/run_lifecycle_1/actions/start_run");
    let response = client
        .post(&url)
        .json(&serde_json::json!({
            "actor_user_id": "u_1",
            "actor_display_name": "Alice",
            "comment": null,
            "client_nonce": "nonce_1",
        }))
        .send()
        .await
        .expect("action request sent");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let payload: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(payload["phase"], "Planning");

    handle.abort();
}

#[tokio::test]
async fn start_run_on_an_already_started_run_is_rejected_as_a_conflict() {
    let scenario = fixtures::test_context(Arc::new(FakeGitHubClient::new(vec![])));
    fixtures::seed_pending_run(&scenario, "run_lifecycle_2");
    let router = conductor_worker::router::build_router(scenario.ctx.clone());
    let (addr, handle) = spawn(router).await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/runs/run_lifecycle_2/actions/start_run");
    let body = serde_json::json!({
        "actor_user_id": "u_1",
        "actor_display_name": "Alice",
        "comment": null,
        "client_nonce": "nonce_1",
    });

    let first = client.post(&url).json(&body).send().await.expect("first request sent");
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    // The run has already moved to `Planning`; starting it again is not a
    // legal transition from its current phase.
    let second = client.post(&url).json(&body).send().await.expect("second request sent");
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    handle.abort();
}

#[tokio::test]
async fn unknown_run_returns_not_found() {
    let scenario = fixtures::test_context(Arc::new(FakeGitHubClient::new(vec![])));
    let router = conductor_worker::router::build_router(scenario.ctx.clone());
    let (addr, handle) = spawn(router).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api/v1/runs/run_does_not_exist"))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}
