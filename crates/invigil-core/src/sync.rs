//! Pure half of the server reconciliation protocol: clock-offset estimation
//! from round-trip timing, and the decision of what one sync report means
//! for the local countdown.
//!
//! The server is authoritative for attempt status and exam position; the
//! local countdown is a display/UX optimization that gets corrected only
//! when it drifts far enough to matter.

use chrono::{DateTime, Utc};

use crate::timer::{TimerSnapshot, exceeds_drift_threshold};
use crate::types::{AttemptStatus, ExamPosition, SyncPayload};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default cadence of the local "is a sync due" check (milliseconds).
pub const DEFAULT_SYNC_CHECK_INTERVAL_MS: u64 = 5_000;

/// Default minimum spacing between server syncs (milliseconds).
pub const DEFAULT_SYNC_CADENCE_MS: u64 = 30_000;

/// Default debounce after a visibility-regained nudge (milliseconds).
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Default drift-correction threshold (milliseconds). Drift below this is
/// attributed to network jitter and left alone; the two-tab reconciliation
/// scenarios require ~10s of accumulated drift to be tolerated, so the
/// default sits comfortably above that.
pub const DEFAULT_DRIFT_THRESHOLD_MS: u64 = 15_000;

// ---------------------------------------------------------------------------
// Clock offset
// ---------------------------------------------------------------------------

/// Estimate the local→server clock offset in milliseconds from one
/// request/response round trip, assuming symmetric network latency:
/// `offset ≈ server_time - (sent + received) / 2`.
///
/// The standard halved-round-trip estimate. It is an approximation, which is
/// exactly why corrections are gated on the drift threshold instead of being
/// applied on every tick.
#[must_use]
pub fn estimate_offset_ms(
    server_time: DateTime<Utc>,
    request_sent_at: DateTime<Utc>,
    response_received_at: DateTime<Utc>,
) -> i64 {
    let sent_ms = request_sent_at.timestamp_millis();
    let received_ms = response_received_at.timestamp_millis();
    let midpoint_ms = sent_ms + (received_ms.saturating_sub(sent_ms)) / 2;
    server_time.timestamp_millis().saturating_sub(midpoint_ms)
}

// ---------------------------------------------------------------------------
// Sync resolution
// ---------------------------------------------------------------------------

/// Server-confirmed values to feed into `TimerState::correct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub remaining_secs: i64,
    pub clock_offset_ms: i64,
    /// Signed local-minus-server drift at decision time, for diagnostics.
    pub drift_ms: i64,
}

/// What one sync report requires of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResolution {
    /// The server closed the attempt. Definite: the local countdown is
    /// overruled no matter how much time it still shows.
    Finished(AttemptStatus),
    /// The attempt is still running.
    Continue {
        /// Present when drift exceeded the threshold.
        correction: Option<Correction>,
        /// Present when the server's position differs from the local one.
        /// The server wins position conflicts.
        position: Option<ExamPosition>,
    },
}

/// Resolve one sync report against the local countdown snapshot.
#[must_use]
pub fn resolve_sync(
    local: &TimerSnapshot,
    local_position: ExamPosition,
    report: &SyncPayload,
    offset_ms: i64,
    threshold_ms: i64,
) -> SyncResolution {
    if report.status.is_final() {
        return SyncResolution::Finished(report.status);
    }

    let server_remaining_ms = report.remaining_time.saturating_mul(1_000);
    let correction =
        if exceeds_drift_threshold(local.remaining_ms, server_remaining_ms, threshold_ms) {
            Some(Correction {
                remaining_secs: report.remaining_time,
                clock_offset_ms: offset_ms,
                drift_ms: local.remaining_ms - server_remaining_ms,
            })
        } else {
            None
        };

    let server_position = report.position();
    let position = (server_position != local_position).then_some(server_position);

    SyncResolution::Continue {
        correction,
        position,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
