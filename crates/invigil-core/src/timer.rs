//! Countdown engine for one exam attempt.
//!
//! Pure time arithmetic against a server-declared start instant and
//! duration, with a signed clock offset approximating the server clock
//! (`server ≈ local + offset`). All internal arithmetic is millisecond
//! resolution; display values are floored to whole seconds, while expiry
//! and sync decisions use the millisecond value.

use chrono::{DateTime, TimeDelta, Utc};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Countdown state for one attempt. Rebuilt from the resume payload on
/// session start; held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    /// Server wall-clock instant the attempt began.
    start_instant: DateTime<Utc>,
    /// Total time budget in seconds.
    duration_secs: i64,
    /// Signed correction added to the local clock to approximate server time.
    clock_offset_ms: i64,
    /// Local timestamp of the last successful reconciliation.
    last_sync_at: DateTime<Utc>,
    /// Server-clock instant the attempt ends: `start + duration` initially,
    /// rebased by corrections.
    deadline: DateTime<Utc>,
}

/// Point-in-time reading of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub remaining_ms: i64,
    pub elapsed_ms: i64,
    /// True exactly when the un-clamped remaining time is <= 0. One-way:
    /// corrections on an expired engine are ignored, so no later snapshot
    /// flips this back.
    pub expired: bool,
}

impl TimerSnapshot {
    /// Whole seconds left, floored for display.
    pub fn remaining_secs(&self) -> i64 {
        self.remaining_ms / 1_000
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

impl TimerState {
    /// Build the initial state. `duration_secs` must be positive (the resume
    /// payload guarantees this); a non-positive value is clamped to zero and
    /// yields an immediately expired engine rather than a panic.
    #[must_use]
    pub fn new(
        start_instant: DateTime<Utc>,
        duration_secs: i64,
        clock_offset_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let duration_secs = duration_secs.max(0);
        Self {
            start_instant,
            duration_secs,
            clock_offset_ms,
            last_sync_at: now,
            deadline: start_instant + TimeDelta::seconds(duration_secs),
        }
    }

    /// The local clock shifted onto the server clock.
    fn server_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + TimeDelta::milliseconds(self.clock_offset_ms)
    }

    /// Read the countdown at local time `now`.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> TimerSnapshot {
        let duration_ms = self.duration_secs.saturating_mul(1_000);
        let raw_remaining = (self.deadline - self.server_now(now)).num_milliseconds();
        let remaining_ms = raw_remaining.clamp(0, duration_ms);
        TimerSnapshot {
            remaining_ms,
            elapsed_ms: duration_ms - remaining_ms,
            expired: raw_remaining <= 0,
        }
    }

    /// Apply a server-confirmed remaining time after drift exceeded the
    /// threshold.
    ///
    /// Never panics: the remaining time is clamped to `[0, duration]`, so a
    /// correction can move the countdown toward the server's value but never
    /// invent time beyond the attempt budget. An expired engine is final:
    /// only `last_sync_at` advances.
    #[must_use]
    pub fn correct(
        &self,
        now: DateTime<Utc>,
        server_remaining_secs: i64,
        new_clock_offset_ms: i64,
    ) -> Self {
        if self.snapshot(now).expired {
            return Self {
                last_sync_at: now,
                ..self.clone()
            };
        }
        let remaining_secs = server_remaining_secs.clamp(0, self.duration_secs);
        let deadline = now
            + TimeDelta::milliseconds(new_clock_offset_ms)
            + TimeDelta::seconds(remaining_secs);
        Self {
            start_instant: self.start_instant,
            duration_secs: self.duration_secs,
            clock_offset_ms: new_clock_offset_ms,
            last_sync_at: now,
            deadline,
        }
    }

    /// Record a successful reconciliation that required no correction.
    #[must_use]
    pub fn synced(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_sync_at: now,
            ..self.clone()
        }
    }

    /// True when the reconciliation cadence has elapsed since the last
    /// successful sync. Throttles network traffic.
    #[must_use]
    pub fn needs_sync(&self, now: DateTime<Utc>, sync_interval: TimeDelta) -> bool {
        now.signed_duration_since(self.last_sync_at) >= sync_interval
    }

    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start_instant
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms
    }

    pub fn last_sync_at(&self) -> DateTime<Utc> {
        self.last_sync_at
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Symmetric drift test: true when the absolute difference between the local
/// and server remaining times exceeds the threshold. Keeps the displayed
/// timer from stuttering on normal network jitter while still correcting
/// real drift (device clock skew, long tab sleep).
#[must_use]
pub fn exceeds_drift_threshold(
    local_remaining_ms: i64,
    server_remaining_ms: i64,
    threshold_ms: i64,
) -> bool {
    local_remaining_ms.abs_diff(server_remaining_ms) > threshold_ms.max(0).unsigned_abs()
}

/// Render remaining milliseconds as a wall-clock countdown:
/// `3_605_000` -> `"1:00:05"`, `65_000` -> `"01:05"`.
#[must_use]
pub fn format_clock(remaining_ms: i64) -> String {
    let total = remaining_ms.max(0) / 1_000;
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
