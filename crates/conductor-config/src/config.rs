// conductor-config/src/config.rs
// ============================================================================
// Module: Configuration Model
// Description: `ConductorConfig` and its sections, strict TOML loading with
//              `CONDUCTOR_<SECTION>_<KEY>` environment overrides, schema
//              validation, and fail-closed field validation (§6.4
//              Environment / Configuration).
// Purpose: Give every other crate one typed, validated config to depend on.
// Dependencies: serde, toml, thiserror, jsonschema
// ============================================================================

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::schema::config_schema;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading/validation errors. Every variant is fail-closed:
/// the process must not start with an invalid config (§6.4 "fails fast at
/// process start rather than mid-run").
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment variable override could not be applied to its field.
    #[error("invalid environment override {key}={value}: {reason}")]
    InvalidOverride {
        /// The environment variable name.
        key: String,
        /// The value it carried.
        value: String,
        /// Why the value could not be applied.
        reason: String,
    },
    /// A validation rule failed after loading.
    #[error("config validation failed: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Agent Timeouts (§5 "Concrete defaults")
// ============================================================================

/// Per-role agent invocation timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTimeouts {
    /// Planner agent timeout. Default 600s (§5).
    pub planner_seconds: u64,
    /// Implementer agent timeout. Default 1800s (§5).
    pub implementer_seconds: u64,
    /// Reviewer agent timeout. Default 300s (§5).
    pub reviewer_seconds: u64,
    /// Tester agent timeout. Default 1800s (§5).
    pub tester_seconds: u64,
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            planner_seconds: 600,
            implementer_seconds: 1_800,
            reviewer_seconds: 300,
            tester_seconds: 1_800,
        }
    }
}

impl AgentTimeouts {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("planner_seconds", self.planner_seconds),
            ("implementer_seconds", self.implementer_seconds),
            ("reviewer_seconds", self.reviewer_seconds),
            ("tester_seconds", self.tester_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("agent_timeouts.{name} must be > 0")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Queue Settings (§4.4, §5)
// ============================================================================

/// Lease duration, retry policy, and backoff curve for one logical queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Lease duration in milliseconds before a claimed job is reclaimable.
    pub lease_ms: u64,
    /// Maximum claim attempts before a job becomes terminally failed.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff delay cap, in milliseconds.
    pub backoff_max_ms: u64,
    /// Jitter fraction applied to backoff delays, in `[0.0, 1.0]`.
    pub backoff_jitter_fraction: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_ms: 120_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            backoff_jitter_fraction: 0.2,
        }
    }
}

impl QueueSettings {
    fn validate(&self, queue_name: &str) -> Result<(), ConfigError> {
        if self.lease_ms == 0 {
            return Err(ConfigError::Invalid(format!("queues.{queue_name}.lease_ms must be > 0")));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!("queues.{queue_name}.max_attempts must be > 0")));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "queues.{queue_name}.backoff_max_ms must be >= backoff_base_ms"
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter_fraction) {
            return Err(ConfigError::Invalid(format!(
                "queues.{queue_name}.backoff_jitter_fraction must be in [0.0, 1.0]"
            )));
        }
        Ok(())
    }
}

/// Per-queue settings for the three logical queues (§4.4 "Queues").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettingsTable {
    /// `agent` queue: planner/implementer/reviewer/tester invocations.
    pub agent: QueueSettings,
    /// `outbox` queue: GitHub writes.
    pub outbox: QueueSettings,
    /// `run` queue: worktree setup, PR-creation kickoff, cleanup.
    pub run: QueueSettings,
}

impl Default for QueueSettingsTable {
    fn default() -> Self {
        Self {
            agent: QueueSettings { max_attempts: 3, ..QueueSettings::default() },
            outbox: QueueSettings { max_attempts: 8, ..QueueSettings::default() },
            run: QueueSettings { max_attempts: 5, ..QueueSettings::default() },
        }
    }
}

impl QueueSettingsTable {
    fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate("agent")?;
        self.outbox.validate("outbox")?;
        self.run.validate("run")
    }
}

// ============================================================================
// SECTION: Comment Rate Limit (§5 "Backpressure", §6.4)
// ============================================================================

/// Outbox comment rate limiting with a priority-bypass list
/// (§5 "comment rate limit 1 per 30s per run with burst of 3").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentRateLimit {
    /// Minimum seconds between non-bypassed comments on the same run.
    pub window_seconds: u64,
    /// Burst allowance within the window.
    pub burst: u32,
    /// Event/action types that bypass the rate limit entirely
    /// (§5: "phase transitions, operator actions, errors, questions").
    pub bypass_event_types: Vec<String>,
}

impl Default for CommentRateLimit {
    fn default() -> Self {
        Self {
            window_seconds: 30,
            burst: 3,
            bypass_event_types: vec![
                "phase.transitioned".to_string(),
                "operator.action".to_string(),
                "agent.failed".to_string(),
                "escalation".to_string(),
            ],
        }
    }
}

impl CommentRateLimit {
    /// Returns whether `event_type` bypasses rate limiting.
    #[must_use]
    pub fn bypasses(&self, event_type: &str) -> bool {
        self.bypass_event_types.iter().any(|bypassed| bypassed == event_type)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 {
            return Err(ConfigError::Invalid("comment_rate_limit.window_seconds must be > 0".to_string()));
        }
        if self.burst == 0 {
            return Err(ConfigError::Invalid("comment_rate_limit.burst must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Retention (§3 "Stream & message retention tables", §5, §6.4)
// ============================================================================

/// Retention windows the janitor prunes against (§4.8, §5 "Backpressure").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Days to retain `stream_events` rows.
    pub stream_events_days: u32,
    /// Days to retain `agent_messages` rows.
    pub agent_messages_days: u32,
    /// Grace period, in hours, before a terminal run's worktree/port lease
    /// is force-released even if the `cleanup` job was lost (§4.8).
    pub terminal_run_cleanup_grace_hours: u32,
    /// Grace period, in minutes, before a `processing` outbox write is
    /// treated as ambiguous rather than silently requeued (§4.8).
    pub outbox_processing_grace_minutes: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            stream_events_days: 90,
            agent_messages_days: 30,
            terminal_run_cleanup_grace_hours: 24,
            outbox_processing_grace_minutes: 15,
        }
    }
}

impl RetentionSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_events_days == 0 {
            return Err(ConfigError::Invalid("retention.stream_events_days must be > 0".to_string()));
        }
        if self.agent_messages_days == 0 {
            return Err(ConfigError::Invalid("retention.agent_messages_days must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Sandbox Settings (§4.7)
// ============================================================================

/// Sensitive-path patterns, protected-file patterns, and the command
/// allowlist consulted by `conductor-sandbox`'s policy pre-check (§4.7,
/// §6.4 "Command allowlist for tool execution").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Glob patterns whose matching paths block writes
    /// (§4.7 "Sensitive-file write protection").
    pub sensitive_path_patterns: Vec<String>,
    /// Commands `run_tests` may invoke, matched against `argv[0]`
    /// (§4.7 "Command allowlist").
    pub command_allowlist: Vec<String>,
    /// Maximum bytes of a `read_file` result before truncation
    /// (§4.7 "Output truncation").
    pub max_read_output_bytes: u64,
    /// Maximum bytes of `run_tests` output before head/tail truncation.
    pub max_test_output_bytes: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            sensitive_path_patterns: vec![
                ".env".to_string(),
                ".env.*".to_string(),
                "*.pem".to_string(),
                "*.key".to_string(),
                "credentials*".to_string(),
                "id_rsa*".to_string(),
            ],
            command_allowlist: vec![
                "npm".to_string(),
                "pnpm".to_string(),
                "yarn".to_string(),
                "pytest".to_string(),
                "cargo".to_string(),
                "go".to_string(),
                "make".to_string(),
            ],
            max_read_output_bytes: 262_144,
            max_test_output_bytes: 1_048_576,
        }
    }
}

impl SandboxSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.command_allowlist.is_empty() {
            return Err(ConfigError::Invalid("sandbox.command_allowlist must not be empty".to_string()));
        }
        if self.max_read_output_bytes == 0 || self.max_test_output_bytes == 0 {
            return Err(ConfigError::Invalid("sandbox output byte limits must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: HTTP & Storage Settings
// ============================================================================

/// HTTP listener configuration for the webhook + operator API surface
/// (§6.2, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Address the axum listener binds to.
    pub bind_address: String,
    /// Number of concurrent orchestrator drain-loop tasks
    /// (§2 "Process topology").
    pub drain_concurrency: usize,
    /// Janitor sweep interval, in seconds (§2 "Process topology").
    pub janitor_interval_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            drain_concurrency: 16,
            janitor_interval_seconds: 30,
        }
    }
}

impl HttpSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.drain_concurrency == 0 {
            return Err(ConfigError::Invalid("http.drain_concurrency must be > 0".to_string()));
        }
        if self.janitor_interval_seconds == 0 {
            return Err(ConfigError::Invalid("http.janitor_interval_seconds must be > 0".to_string()));
        }
        Ok(())
    }
}

/// `SQLite` storage location (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the `SQLite` database file.
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { sqlite_path: "conductor.db".to_string() }
    }
}

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// The full Conductor process configuration (§6.4 Environment /
/// Configuration). Deserialized from TOML, then overridden from
/// `CONDUCTOR_<SECTION>_<KEY>` environment variables, then validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Per-role agent timeouts.
    pub agent_timeouts: AgentTimeouts,
    /// Per-queue lease/retry/backoff settings.
    pub queues: QueueSettingsTable,
    /// Outbox comment rate limiting.
    pub comment_rate_limit: CommentRateLimit,
    /// Retention windows for stream events, agent messages, and cleanup
    /// grace periods.
    pub retention: RetentionSettings,
    /// Sandbox path-safety and command-allowlist settings.
    pub sandbox: SandboxSettings,
    /// HTTP listener and process-topology settings.
    pub http: HttpSettings,
    /// Storage backend settings.
    pub storage: StorageSettings,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            agent_timeouts: AgentTimeouts::default(),
            queues: QueueSettingsTable::default(),
            comment_rate_limit: CommentRateLimit::default(),
            retention: RetentionSettings::default(),
            sandbox: SandboxSettings::default(),
            http: HttpSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl ConductorConfig {
    /// Validates every section. Called by every loader before returning a
    /// config to a caller; nothing downstream re-validates.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first section that
    /// failed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent_timeouts.validate()?;
        self.queues.validate()?;
        self.comment_rate_limit.validate()?;
        self.retention.validate()?;
        self.sandbox.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Parses `text` as TOML into a [`ConductorConfig`] and validates it.
/// Performs no environment overrides; use [`load_from_toml_with_env`] for
/// the full process-start loading path.
///
/// # Errors
/// Returns [`ConfigError::Parse`] on malformed TOML or
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_from_str(text: &str) -> Result<ConductorConfig, ConfigError> {
    let raw: toml::Value = toml::from_str(text)?;
    let json_view = serde_json::to_value(&raw).map_err(|err| ConfigError::Invalid(err.to_string()))?;
    validate_against_schema(&json_view)?;

    let config: ConductorConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Validates `value` against [`config_schema`], collapsing every violation
/// into one [`ConfigError::Invalid`] so an unknown or misshapen key is
/// caught before the lenient `#[serde(default)]` typed deserialization
/// would otherwise silently drop it (§6.4 "validated... against a JSON
/// Schema").
fn validate_against_schema(value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema = config_schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|err| ConfigError::Invalid(format!("internal schema error: {err}")))?;
    let errors: Vec<String> = validator.iter_errors(value).map(|err| err.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("schema validation failed: {}", errors.join("; "))))
    }
}

/// Loads `text` as TOML, applies `CONDUCTOR_<SECTION>_<KEY>` overrides from
/// `env` (normally `std::env::vars()`), and validates the result
/// (§6.4 "Configuration loading").
///
/// Overrides are applied to the parsed `serde_json::Value` tree before the
/// final typed deserialization, so a malformed override value fails with
/// [`ConfigError::InvalidOverride`] rather than silently being ignored.
///
/// # Errors
/// Returns [`ConfigError::Parse`] on malformed TOML,
/// [`ConfigError::InvalidOverride`] if an override cannot be applied, or
/// [`ConfigError::Invalid`] if the final config fails validation.
pub fn load_from_toml_with_env(
    text: &str,
    env: impl IntoIterator<Item = (String, String)>,
) -> Result<ConductorConfig, ConfigError> {
    let base: ConductorConfig = toml::from_str(text)?;
    let mut value = serde_json::to_value(base).map_err(|err| ConfigError::Invalid(err.to_string()))?;

    let overrides: HashMap<String, String> = env
        .into_iter()
        .filter_map(|(key, val)| key.strip_prefix("CONDUCTOR_").map(|rest| (rest.to_lowercase(), val)))
        .collect();

    for (path, raw_value) in overrides {
        apply_override(&mut value, &path, &raw_value)?;
    }

    validate_against_schema(&value)?;

    let config: ConductorConfig = serde_json::from_value(value).map_err(|err| ConfigError::Invalid(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Applies one `section_key` (already lower-cased, `_`-separated) override
/// to `root`, parsing `raw_value` as the field's existing JSON type.
fn apply_override(root: &mut serde_json::Value, path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.splitn(2, '_').collect();
    let [section, key] = segments.as_slice() else {
        return Err(ConfigError::InvalidOverride {
            key: path.to_string(),
            value: raw_value.to_string(),
            reason: "expected CONDUCTOR_<SECTION>_<KEY>".to_string(),
        });
    };

    let target = root
        .get_mut(section)
        .and_then(|section_value| section_value.get_mut(key))
        .ok_or_else(|| ConfigError::InvalidOverride {
            key: path.to_string(),
            value: raw_value.to_string(),
            reason: format!("no such config field: {section}.{key}"),
        })?;

    *target = coerce_override(target, raw_value).ok_or_else(|| ConfigError::InvalidOverride {
        key: path.to_string(),
        value: raw_value.to_string(),
        reason: "could not parse value against the field's existing type".to_string(),
    })?;
    Ok(())
}

/// Parses `raw_value` into the same JSON shape as `existing`, so an
/// override can never silently change a field's declared type.
fn coerce_override(existing: &serde_json::Value, raw_value: &str) -> Option<serde_json::Value> {
    match existing {
        serde_json::Value::String(_) => Some(serde_json::Value::String(raw_value.to_string())),
        serde_json::Value::Bool(_) => raw_value.parse::<bool>().ok().map(serde_json::Value::Bool),
        serde_json::Value::Number(_) => {
            if let Ok(as_u64) = raw_value.parse::<u64>() {
                Some(serde_json::Value::from(as_u64))
            } else {
                raw_value.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(serde_json::Value::Number)
            }
        }
        serde_json::Value::Array(_) => {
            let items = raw_value.split(',').map(|item| serde_json::Value::String(item.trim().to_string())).collect();
            Some(serde_json::Value::Array(items))
        }
        _ => None,
    }
}
