// crates/conductor-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: Wall-clock timestamp newtype with a stable RFC 3339 wire form.
// Purpose: Give every event/record a single, unambiguous, sortable time type.
// Dependencies: time
// ============================================================================

//! Unlike the causal ordering carried by event sequence numbers, timestamps
//! here are informational only — nothing in the state machine may branch on
//! wall-clock time. Callers (the orchestrator, the store) are the only
//! producers of [`Timestamp::now`]; the core otherwise only ever receives
//! timestamps as arguments.

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A UTC point in time, serialized on the wire as an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Captures the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing [`OffsetDateTime`], normalizing it to UTC.
    #[must_use]
    pub fn from_offset_date_time(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the underlying [`OffsetDateTime`].
    #[must_use]
    pub fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Parses an RFC 3339 string into a timestamp.
    ///
    /// # Errors
    /// Returns an error if `value` is not a valid RFC 3339 string.
    pub fn parse(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::from_offset_date_time)
    }

    /// Formats the timestamp as an RFC 3339 string.
    ///
    /// # Panics
    /// Never panics for a timestamp produced by this type; `OffsetDateTime`
    /// formatting only fails for components outside the RFC 3339 year range.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
    }

    /// Returns the number of whole seconds elapsed since `self` until `now`.
    #[must_use]
    pub fn elapsed_seconds_since(self, now: Timestamp) -> i64 {
        (now.0 - self.0).whole_seconds()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(DeError::custom)
    }
}
