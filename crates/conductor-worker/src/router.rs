// conductor-worker/src/router.rs
// ============================================================================
// Module: HTTP Router
// Description: The axum `Router` serving GitHub webhook ingestion and the
//              operator control surface (§6.2, §6.3).
// Purpose: One process entry point both `serve`-mode `conductor-cli` and
//          integration tests can mount; every mutating route calls
//          `actions::execute_action` so there is exactly one place CAS
//          validation and decision-event construction happen.
// Dependencies: axum, conductor-core
// ============================================================================

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use conductor_core::ids::RunId;
use serde::Deserialize;
use serde::Serialize;

use crate::actions::ActionRequest;
use crate::actions::OperatorAction;
use crate::actions::execute_action;
use crate::context::ConductorContext;
use crate::errors::WorkerError;
use crate::webhook::receive_github_webhook;

/// Builds the full HTTP surface over `ctx`.
#[must_use]
pub fn build_router(ctx: ConductorContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/github/:project_id", post(receive_github_webhook))
        .route("/api/v1/runs/:run_id", get(get_run))
        .route("/api/v1/runs/:run_id/actions/:action", post(post_action))
        .with_state(ctx)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_run(State(ctx): State<ConductorContext>, Path(run_id): Path<String>) -> axum::response::Response {
    match ctx.runs.get(&RunId::new(run_id)) {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "run not found").into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Request body for `POST /api/v1/runs/:run_id/actions/:action`.
#[derive(Debug, Deserialize)]
struct ActionBody {
    actor_user_id: String,
    actor_display_name: String,
    comment: Option<String>,
    client_nonce: String,
}

/// Response body for a successfully applied action.
#[derive(Debug, Serialize)]
struct ActionResponse {
    run_id: String,
    phase: String,
    step: String,
}

async fn post_action(
    State(ctx): State<ConductorContext>,
    Path((run_id, action)): Path<(String, String)>,
    Json(body): Json<ActionBody>,
) -> axum::response::Response {
    let Some(action) = OperatorAction::parse(&action) else {
        return (StatusCode::BAD_REQUEST, format!("unknown action: {action}")).into_response();
    };

    let request = ActionRequest {
        run_id: RunId::new(run_id),
        action,
        actor_user_id: body.actor_user_id,
        actor_display_name: body.actor_display_name,
        comment: body.comment,
        client_nonce: body.client_nonce,
        override_grant: None,
    };

    match execute_action(&ctx, request) {
        Ok(run) => Json(ActionResponse {
            run_id: run.run_id.to_string(),
            phase: format!("{:?}", run.phase),
            step: format!("{:?}", run.step),
        })
        .into_response(),
        Err(err) => action_error_response(&err),
    }
}

fn action_error_response(err: &WorkerError) -> axum::response::Response {
    match err {
        WorkerError::RunNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
        WorkerError::ActionNotPermitted { .. } => (StatusCode::CONFLICT, err.to_string()).into_response(),
        WorkerError::RunStore(conductor_core::interfaces::RunStoreError::StaleTransition { .. }) => {
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
