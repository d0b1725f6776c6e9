// conductor-providers/src/github.rs
// ============================================================================
// Module: GitHub Client
// Description: Typed request/response shapes for the outbox's five write
//              kinds, plus an HTTP implementation and a fake for tests.
// Purpose: Isolate the outbox worker from GitHub's actual REST/GraphQL shape.
// Dependencies: reqwest, serde_json
// ============================================================================

//! ## Overview
//! `conductor-core::outbox::GitHubWriteKind` enumerates *what* kind of write
//! the outbox performs; this module defines *how* each kind is actually sent
//! and what comes back. The outbox worker never touches `reqwest` directly —
//! it only ever sees [`GitHubClient`], so a fake implementation can stand in
//! during tests without spinning up an HTTP server for most of them.

use std::collections::HashMap;
use std::sync::Mutex;

use conductor_core::outbox::GitHubWriteKind;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Request / Response
// ============================================================================

/// One outbound write, already rendered (marker embedded) by the outbox
/// worker. This module never re-derives the marker; it only transports it.
#[derive(Debug, Clone)]
pub struct GitHubWriteRequest {
    /// Which kind of write this is; selects the endpoint/verb.
    pub kind: GitHubWriteKind,
    /// The host-side node this write targets (PR node id, issue node id,
    /// commit sha for a status check, ...).
    pub target_node_id: String,
    /// The rendered payload, with the hidden marker comment embedded where
    /// the write kind has a body (`create_pr`, `update_pr_description`,
    /// `post_comment`).
    pub body: Value,
    /// The bearer token to authenticate the request with.
    pub credential_token: String,
}

/// What the host reports back after a write succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubWriteResponse {
    /// Host-assigned opaque node id.
    pub github_id: String,
    /// Host-assigned number (PR/issue number), when the write kind has one.
    pub github_number: Option<i64>,
    /// Canonical URL to the created/updated resource.
    pub github_url: String,
}

/// Errors the outbox worker needs to distinguish to pick the right status
/// transition (§4.6 "Status transitions").
#[derive(Debug, Error)]
pub enum GitHubApiError {
    /// The host rejected the request outright (4xx other than rate limit);
    /// retrying would not help. Maps to `GitHubWriteStatus::Failed`.
    #[error("github rejected the write: {0}")]
    Rejected(String),
    /// The host is rate-limiting this caller; retryable after backoff.
    /// Maps to a re-queue, not a terminal failure.
    #[error("github rate limited the request, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retrying, per the host's response.
        retry_after_ms: u64,
    },
    /// The request may or may not have reached the host (timeout, connection
    /// reset, 5xx). Maps to `GitHubWriteStatus::Ambiguous`.
    #[error("ambiguous failure, outcome unknown: {0}")]
    Ambiguous(String),
}

// ============================================================================
// SECTION: Client Trait
// ============================================================================

/// Performs the outbox's external GitHub writes and the recovery scan used
/// to resolve ambiguous ones (§4.6 "Recovery via marker comments").
pub trait GitHubClient: Send + Sync {
    /// Sends one write. Implementations must classify every failure as one
    /// of [`GitHubApiError`]'s variants; the outbox worker's status
    /// transition depends on getting this classification right.
    ///
    /// # Errors
    /// Returns [`GitHubApiError`] classifying the failure mode.
    fn send_write(&self, request: &GitHubWriteRequest) -> Result<GitHubWriteResponse, GitHubApiError>;

    /// Scans recent comments/checks on `target_node_id` for a rendered
    /// marker matching `expected_marker_json` (§4.6 "bounded... scan of the
    /// most recent N comments/checks on the target"). Returns the matching
    /// write's response shape if found.
    ///
    /// # Errors
    /// Returns [`GitHubApiError`] if the scan itself fails (distinct from
    /// "scanned and found nothing", which is `Ok(None)`).
    fn find_marker(
        &self,
        target_node_id: &str,
        expected_marker_json: &str,
    ) -> Result<Option<GitHubWriteResponse>, GitHubApiError>;
}

// ============================================================================
// SECTION: HTTP Implementation
// ============================================================================

/// Configuration for [`HttpGitHubClient`].
#[derive(Debug, Clone)]
pub struct HttpGitHubClientConfig {
    /// Base URL of the GitHub REST API (overridable for GitHub Enterprise
    /// and for pointing at a local fixture server in tests).
    pub api_base_url: String,
    /// Maximum recent comments/checks to scan during ambiguous recovery
    /// (§4.6 "bounded... scan").
    pub recovery_scan_limit: u32,
    /// Request timeout.
    pub request_timeout_ms: u64,
}

impl Default for HttpGitHubClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            recovery_scan_limit: 20,
            request_timeout_ms: 10_000,
        }
    }
}

/// `reqwest`-backed [`GitHubClient`].
pub struct HttpGitHubClient {
    config: HttpGitHubClientConfig,
    http: reqwest::blocking::Client,
}

impl HttpGitHubClient {
    /// Builds a client from config.
    ///
    /// # Errors
    /// Returns an error if the underlying `reqwest` client cannot be built
    /// (e.g. TLS backend initialization failure).
    pub fn new(config: HttpGitHubClientConfig) -> Result<Self, GitHubApiError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| GitHubApiError::Ambiguous(err.to_string()))?;
        Ok(Self { config, http })
    }

    fn endpoint_for(&self, request: &GitHubWriteRequest) -> String {
        let base = &self.config.api_base_url;
        match request.kind {
            GitHubWriteKind::CreatePr => format!("{base}/repos/_/pulls"),
            GitHubWriteKind::UpdatePrDescription => {
                format!("{base}/repos/_/pulls/{}", request.target_node_id)
            }
            GitHubWriteKind::PostComment => {
                format!("{base}/repos/_/issues/{}/comments", request.target_node_id)
            }
            GitHubWriteKind::UpdateStatusCheck => {
                format!("{base}/repos/_/statuses/{}", request.target_node_id)
            }
            GitHubWriteKind::RequestReview => {
                format!("{base}/repos/_/pulls/{}/requested_reviewers", request.target_node_id)
            }
        }
    }

    fn classify_response(response: reqwest::blocking::Response) -> Result<GitHubWriteResponse, GitHubApiError> {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map_or(1_000, |seconds| seconds.saturating_mul(1_000));
            return Err(GitHubApiError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(GitHubApiError::Ambiguous(format!("server error: {status}")));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GitHubApiError::Rejected(format!("{status}: {body}")));
        }
        response
            .json::<GitHubWriteResponse>()
            .map_err(|err| GitHubApiError::Ambiguous(err.to_string()))
    }
}

impl GitHubClient for HttpGitHubClient {
    fn send_write(&self, request: &GitHubWriteRequest) -> Result<GitHubWriteResponse, GitHubApiError> {
        let url = self.endpoint_for(request);
        let verb = match request.kind {
            GitHubWriteKind::CreatePr | GitHubWriteKind::PostComment | GitHubWriteKind::RequestReview => "POST",
            GitHubWriteKind::UpdatePrDescription | GitHubWriteKind::UpdateStatusCheck => "PATCH",
        };
        let builder = if verb == "POST" {
            self.http.post(&url)
        } else {
            self.http.patch(&url)
        };
        let response = builder
            .bearer_auth(&request.credential_token)
            .json(&request.body)
            .send()
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    GitHubApiError::Ambiguous(err.to_string())
                } else {
                    GitHubApiError::Ambiguous(err.to_string())
                }
            })?;
        Self::classify_response(response)
    }

    fn find_marker(
        &self,
        target_node_id: &str,
        expected_marker_json: &str,
    ) -> Result<Option<GitHubWriteResponse>, GitHubApiError> {
        let url = format!(
            "{}/repos/_/issues/{target_node_id}/comments?per_page={}",
            self.config.api_base_url, self.config.recovery_scan_limit
        );
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| GitHubApiError::Ambiguous(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GitHubApiError::Ambiguous(format!("scan failed: {}", response.status())));
        }
        let comments: Vec<Value> = response
            .json()
            .map_err(|err| GitHubApiError::Ambiguous(err.to_string()))?;
        for comment in comments {
            let Some(body) = comment.get("body").and_then(Value::as_str) else { continue };
            if !body.contains(expected_marker_json) {
                continue;
            }
            let github_id = comment.get("node_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let github_url = comment.get("html_url").and_then(Value::as_str).unwrap_or_default().to_string();
            return Ok(Some(GitHubWriteResponse {
                github_id,
                github_number: None,
                github_url,
            }));
        }
        Ok(None)
    }
}

// ============================================================================
// SECTION: Fake Client (tests)
// ============================================================================

/// In-memory [`GitHubClient`] for tests: records every write it was sent and
/// replies with a scripted outcome per call index.
pub struct FakeGitHubClient {
    sent: Mutex<Vec<GitHubWriteRequest>>,
    scripted: Mutex<Vec<Result<GitHubWriteResponse, GitHubApiError>>>,
    markers: Mutex<HashMap<String, GitHubWriteResponse>>,
}

impl FakeGitHubClient {
    /// Creates a fake that will reply with `scripted` responses in order,
    /// one per call to [`GitHubClient::send_write`].
    #[must_use]
    pub fn new(scripted: Vec<Result<GitHubWriteResponse, GitHubApiError>>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(scripted),
            markers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns every write this fake was sent, in call order.
    #[must_use]
    pub fn sent_writes(&self) -> Vec<GitHubWriteRequest> {
        self.sent.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Seeds a marker the fake's recovery scan can find, keyed by the
    /// rendered marker JSON substring that would appear in a real comment.
    pub fn seed_marker(&self, marker_json: &str, response: GitHubWriteResponse) {
        if let Ok(mut guard) = self.markers.lock() {
            guard.insert(marker_json.to_string(), response);
        }
    }
}

impl Clone for GitHubWriteRequest {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            target_node_id: self.target_node_id.clone(),
            body: self.body.clone(),
            credential_token: self.credential_token.clone(),
        }
    }
}

impl GitHubClient for FakeGitHubClient {
    fn send_write(&self, request: &GitHubWriteRequest) -> Result<GitHubWriteResponse, GitHubApiError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        let mut scripted = self.scripted.lock().map_err(|_| GitHubApiError::Ambiguous("poisoned".to_string()))?;
        if scripted.is_empty() {
            return Err(GitHubApiError::Ambiguous("fake exhausted".to_string()));
        }
        scripted.remove(0)
    }

    fn find_marker(
        &self,
        _target_node_id: &str,
        expected_marker_json: &str,
    ) -> Result<Option<GitHubWriteResponse>, GitHubApiError> {
        let markers = self.markers.lock().map_err(|_| GitHubApiError::Ambiguous("poisoned".to_string()))?;
        Ok(markers.get(expected_marker_json).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::FakeGitHubClient;
    use super::GitHubApiError;
    use super::GitHubClient;
    use super::GitHubWriteRequest;
    use super::GitHubWriteResponse;
    use conductor_core::outbox::GitHubWriteKind;
    use serde_json::json;

    fn sample_request() -> GitHubWriteRequest {
        GitHubWriteRequest {
            kind: GitHubWriteKind::CreatePr,
            target_node_id: "repo_1".to_string(),
            body: json!({"title": "Fix bug"}),
            credential_token: "ghs_token".to_string(),
        }
    }

    #[test]
    fn fake_client_replays_scripted_responses_in_order() {
        let fake = FakeGitHubClient::new(vec![Ok(GitHubWriteResponse {
            github_id: "PR_1".to_string(),
            github_number: Some(42),
            github_url: "https://github.com/o/r/pull/42".to_string(),
        })]);
        let response = fake.send_write(&sample_request()).expect("first call scripted ok");
        assert_eq!(response.github_number, Some(42));
        assert_eq!(fake.sent_writes().len(), 1);
    }

    #[test]
    fn fake_client_errors_once_scripted_responses_exhausted() {
        let fake = FakeGitHubClient::new(vec![]);
        let err = fake.send_write(&sample_request()).expect_err("no scripted responses");
        assert!(matches!(err, GitHubApiError::Ambiguous(_)));
    }

    #[test]
    fn marker_scan_finds_seeded_marker_by_json_substring() {
        let fake = FakeGitHubClient::new(vec![]);
        fake.seed_marker(
            r#"{"github_write_id":"ghw_1","payload_hash":"abc"}"#,
            GitHubWriteResponse {
                github_id: "IC_1".to_string(),
                github_number: None,
                github_url: "https://github.com/o/r/issues/1#comment".to_string(),
            },
        );
        let found = fake
            .find_marker("issue_1", r#"{"github_write_id":"ghw_1","payload_hash":"abc"}"#)
            .expect("scan ok");
        assert!(found.is_some());
        let missing = fake.find_marker("issue_1", "no such marker").expect("scan ok");
        assert!(missing.is_none());
    }
}
