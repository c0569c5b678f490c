// crates/tenancy-core/src/core/time.rs
// ============================================================================
// Module: Tenancy Time Model
// Description: Millisecond timestamps for registry records and audit events.
// Purpose: Provide one canonical, storage-friendly time representation.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Registry rows persist timestamps as unix epoch milliseconds (`BIGINT`).
//! [`Timestamp`] wraps that value and renders RFC 3339 for operators.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use ::time::OffsetDateTime;
use ::time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - Values read from storage are trusted as-is; monotonicity is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Wraps a unix millisecond value.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Returns the value as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(&self) -> i64 {
        self.0
    }

    /// Renders the timestamp as RFC 3339, or `None` when out of range.
    #[must_use]
    pub fn to_rfc3339(&self) -> Option<String> {
        let nanos = i128::from(self.0) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.format(&Rfc3339).ok()
    }
}
