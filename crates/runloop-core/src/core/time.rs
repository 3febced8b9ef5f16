// runloop-core/src/core/time.rs
// ============================================================================
// Module: Runloop Time Model
// Description: Canonical timestamp representation for runs and events.
// Purpose: Provide deterministic, replayable time values across Runloop records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Runloop stores explicit unix-epoch-millisecond values on runs and events to
//! keep replay deterministic. Core types never read wall-clock time directly;
//! the runtime supplies timestamps at the process edges.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical timestamp used in Runloop rows and event payloads.
///
/// # Invariants
/// - Values are unix epoch milliseconds.
/// - Monotonicity is a caller responsibility; event ordering uses event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Reads the current wall-clock time.
    ///
    /// Runtime-edge helper; core types accept timestamps, they never call this
    /// themselves.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }
}
