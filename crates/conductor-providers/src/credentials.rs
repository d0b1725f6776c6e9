// conductor-providers/src/credentials.rs
// ============================================================================
// Module: Credential Resolution
// Description: Implementations of `conductor_core::interfaces::CredentialProvider`.
// Purpose: Resolve short-lived, per-(project, step) scoped GitHub tokens
//          without agent code ever seeing them (§5 "External credentials").
// Dependencies: conductor-core
// ============================================================================

//! ## Overview
//! GitHub App installation tokens are the intended production shape: short
//! lived, scoped to one installation, exchanged via a signed JWT. This crate
//! does not carry a JWT/RSA-signing dependency the rest of the workspace
//! doesn't already use, so [`StaticCredentialProvider`] wraps a single
//! pre-provisioned token per project with an operator-configured expiry —
//! the same trust model as a GitHub App token, minus the exchange step,
//! which is the seam a production deployment replaces with a real
//! installation-token exchange behind this same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use conductor_core::ids::ProjectId;
use conductor_core::interfaces::CredentialProvider;
use conductor_core::interfaces::ScopedCredential;
use conductor_core::time::Timestamp;

pub use conductor_core::interfaces::CredentialError;

// ============================================================================
// SECTION: Static Provider
// ============================================================================

/// One project's resolved token and the time it expires.
#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Timestamp,
}

/// Resolves credentials from an operator-configured, per-project token map
/// (§5 "External credentials"). Every step within a project shares the same
/// token; Conductor does not narrow scope per step beyond what the
/// underlying GitHub App installation already restricts.
pub struct StaticCredentialProvider {
    tokens: HashMap<String, CachedToken>,
}

impl StaticCredentialProvider {
    /// Builds a provider from a `project_id -> (token, expires_at)` map,
    /// typically sourced from `conductor-config`.
    #[must_use]
    pub fn new(tokens: HashMap<String, (String, Timestamp)>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(project_id, (token, expires_at))| (project_id, CachedToken { token, expires_at }))
            .collect();
        Self { tokens }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn resolve(&self, project_id: &ProjectId, _step: &str) -> Result<ScopedCredential, CredentialError> {
        let cached = self
            .tokens
            .get(project_id.as_str())
            .ok_or_else(|| CredentialError::Unavailable(project_id.as_str().to_string()))?;
        Ok(ScopedCredential {
            token: cached.token.clone(),
            expires_at: cached.expires_at,
        })
    }
}

// ============================================================================
// SECTION: Installation Token Cache
// ============================================================================

/// Caches a short-lived token per project, re-resolving only once the
/// cached one is within `refresh_margin_seconds` of expiry. Wraps any
/// underlying [`CredentialProvider`] (typically one backed by a real
/// installation-token exchange) with the refresh-before-expiry behavior
/// the outbox worker needs without re-resolving on every write.
pub struct InstallationTokenCache<P: CredentialProvider> {
    inner: P,
    refresh_margin_seconds: i64,
    cache: Mutex<HashMap<String, ScopedCredential>>,
}

impl<P: CredentialProvider> InstallationTokenCache<P> {
    /// Wraps `inner`, refreshing a cached token once it is within
    /// `refresh_margin_seconds` of its `expires_at`.
    #[must_use]
    pub fn new(inner: P, refresh_margin_seconds: i64) -> Self {
        Self {
            inner,
            refresh_margin_seconds,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(credential: &ScopedCredential, now: Timestamp, margin_seconds: i64) -> bool {
        credential.expires_at.elapsed_seconds_since(now) > margin_seconds
    }
}

impl<P: CredentialProvider> CredentialProvider for InstallationTokenCache<P> {
    fn resolve(&self, project_id: &ProjectId, step: &str) -> Result<ScopedCredential, CredentialError> {
        let now = Timestamp::now();
        {
            let cache = self
                .cache
                .lock()
                .map_err(|_| CredentialError::ExchangeFailed("credential cache poisoned".to_string()))?;
            if let Some(cached) = cache.get(project_id.as_str()) {
                if Self::is_fresh(cached, now, self.refresh_margin_seconds) {
                    return Ok(cached.clone());
                }
            }
        }
        let resolved = self.inner.resolve(project_id, step)?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| CredentialError::ExchangeFailed("credential cache poisoned".to_string()))?;
        cache.insert(project_id.as_str().to_string(), resolved.clone());
        Ok(resolved)
    }
}

impl Clone for ScopedCredential {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            expires_at: self.expires_at,
        }
    }
}
