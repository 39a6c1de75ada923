//! Lifetime policy evaluation.
//!
//! A lost object keeps living for the duration its policy allows, counted
//! from the last time discovery observed it. The functions here turn a
//! policy plus a reference timestamp into a scheduled timestamp and decide
//! whether that schedule has elapsed.
//!
//! Scheduled timestamps use two reserved values:
//!
//! - `0` -- no schedule; never elapses
//! - `1` -- elapsed immediately; smaller than any real observation time

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Upper bound of schedulable timestamps (2038-01-01T00:00:00Z).
///
/// Shared with storage: a schedule that would pass this point is clamped to it.
pub const TIME_HORIZON: Timestamp = 2_145_916_800;

/// Scheduled timestamp meaning "no schedule".
pub const TS_NONE: Timestamp = 0;

/// Scheduled timestamp meaning "elapsed immediately".
pub const TS_IMMEDIATE: Timestamp = 1;

/// How long a lost object is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifetimeKind {
    /// Kept for `duration` seconds after it was last observed.
    #[serde(alias = "after")]
    AfterDuration,
    /// Gone as soon as it is lost.
    Immediately,
    /// Kept forever.
    Never,
}

/// Lifetime policy for one object kind. Read-only to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifetimePolicy {
    #[serde(rename = "type")]
    pub kind: LifetimeKind,
    /// Seconds; only meaningful for [`LifetimeKind::AfterDuration`].
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub duration: i64,
}

impl LifetimePolicy {
    pub const fn after(duration: i64) -> Self {
        LifetimePolicy {
            kind: LifetimeKind::AfterDuration,
            duration,
        }
    }

    pub const fn immediately() -> Self {
        LifetimePolicy {
            kind: LifetimeKind::Immediately,
            duration: 0,
        }
    }

    pub const fn never() -> Self {
        LifetimePolicy {
            kind: LifetimeKind::Never,
            duration: 0,
        }
    }
}

impl fmt::Display for LifetimePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LifetimeKind::AfterDuration => write!(f, "after {}s", self.duration),
            LifetimeKind::Immediately => f.write_str("immediately"),
            LifetimeKind::Never => f.write_str("never"),
        }
    }
}

/// When a lost object's lifetime ends: `lastcheck + duration`, clamped to
/// [`TIME_HORIZON`] without overflowing.
///
/// Negative durations are treated as zero.
pub fn end_of_life(lastcheck: Timestamp, duration: i64) -> Timestamp {
    let duration = duration.max(0);

    if TIME_HORIZON.saturating_sub(lastcheck) > duration {
        lastcheck + duration
    } else {
        TIME_HORIZON
    }
}

/// Scheduled timestamp for an object last observed at `lastcheck`.
pub fn resolve_timestamp(lastcheck: Timestamp, policy: &LifetimePolicy) -> Timestamp {
    match policy.kind {
        LifetimeKind::AfterDuration => end_of_life(lastcheck, policy.duration),
        LifetimeKind::Immediately => TS_IMMEDIATE,
        LifetimeKind::Never => TS_NONE,
    }
}

/// Whether `scheduled` lies strictly before `reference`. An unscheduled (`0`)
/// timestamp never elapses.
pub fn has_elapsed(reference: Timestamp, scheduled: Timestamp) -> bool {
    scheduled != TS_NONE && reference > scheduled
}

/// Parse a duration in seconds, optionally suffixed with `s`, `m`, `h`, `d` or `w`.
pub fn parse_duration(value: &str) -> Result<i64, CoreError> {
    let invalid = |reason: &str| CoreError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    let (digits, multiplier) = match trimmed.as_bytes()[trimmed.len() - 1] {
        b's' => (&trimmed[..trimmed.len() - 1], 1),
        b'm' => (&trimmed[..trimmed.len() - 1], 60),
        b'h' => (&trimmed[..trimmed.len() - 1], 3_600),
        b'd' => (&trimmed[..trimmed.len() - 1], 86_400),
        b'w' => (&trimmed[..trimmed.len() - 1], 604_800),
        b'0'..=b'9' => (trimmed, 1),
        _ => return Err(invalid("unknown suffix")),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected a non-negative integer"));
    }

    digits
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| invalid("out of range"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(i64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(n) if n >= 0 => Ok(n),
        RawDuration::Seconds(n) => Err(serde::de::Error::custom(format!(
            "lifetime duration must not be negative, got {n}"
        ))),
        RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}
