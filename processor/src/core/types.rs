//! Dubflow Core Type Definitions
//!
//! Fundamental aliases and helpers shared across modules.

use std::time::Duration;

// =============================================================================
// ID Types
// =============================================================================

/// Task unique identifier (opaque, UUID v4 when created by the CLI)
pub type TaskId = String;

/// Speaker identifier as reported by speech recognition
pub type SpeakerId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Converts seconds to a `Duration`, clamping negative and non-finite input to zero.
pub fn secs_to_duration(secs: TimeSec) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Current time as an RFC 3339 string, the format stored on task records.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
