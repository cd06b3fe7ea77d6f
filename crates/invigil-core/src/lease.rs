//! Master-tab lease: the single shared mutable record that elects one tab
//! session per attempt as the driver of the countdown.
//!
//! The shared store has no transactions, so claiming is write-then-verify:
//! decide from a fresh read, write, re-read, and trust mastership only if
//! the token that reads back is ours. That narrows but does not eliminate
//! the two-writer race; the residual window is closed by the next heartbeat
//! cycle, where [`heartbeat_decision`] steps a losing master down.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TabToken;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default master heartbeat interval (milliseconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// Default liveness-check interval for blocked tabs (milliseconds).
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 2_000;

/// A lease is dead after this many missed heartbeats.
pub const HEARTBEAT_TIMEOUT_FACTOR: u64 = 3;

/// Upper bound on the takeover delay after a graceful close (milliseconds).
pub const MAX_TAKEOVER_JITTER_MS: u64 = 100;

/// Timeout after which a lease with no fresh heartbeat is claimable:
/// `interval * 3` (e.g. 6s for a 2s heartbeat).
#[must_use]
pub fn heartbeat_timeout_ms(heartbeat_interval_ms: u64) -> u64 {
    heartbeat_interval_ms.saturating_mul(HEARTBEAT_TIMEOUT_FACTOR)
}

// ---------------------------------------------------------------------------
// Lease record
// ---------------------------------------------------------------------------

/// The shared master record for one attempt id, visible to every tab of the
/// same profile. At most one *alive* lease should exist at any instant;
/// staleness makes it claimable by anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterLease {
    /// Token of the currently elected tab session.
    pub token: TabToken,
    /// When this token first became master. Preserved across re-claims by
    /// the same token.
    pub registered_at: DateTime<Utc>,
    /// Most recent liveness proof written by the master.
    pub last_heartbeat: DateTime<Utc>,
}

impl MasterLease {
    /// A brand-new lease for a tab winning an election now.
    #[must_use]
    pub fn claimed(token: TabToken, now: DateTime<Utc>) -> Self {
        Self {
            token,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    /// Alive means a heartbeat younger than the timeout.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        now.signed_duration_since(self.last_heartbeat) >= timeout
    }

    /// The same lease with a fresh heartbeat.
    #[must_use]
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            token: self.token.clone(),
            registered_at: self.registered_at,
            last_heartbeat: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Claim & heartbeat decisions
// ---------------------------------------------------------------------------

/// Outcome of examining the stored lease before a claim write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Write this lease, then re-read to verify it stuck.
    Claim { lease: MasterLease },
    /// A live lease belongs to another tab.
    Defer { holder: TabToken },
}

/// Decide whether `own` may claim mastership given the stored lease.
///
/// Claimable when the record is missing, stale, or already carries `own`
/// (re-claim, preserving the original `registered_at`).
#[must_use]
pub fn claim_decision(
    existing: Option<&MasterLease>,
    own: &TabToken,
    now: DateTime<Utc>,
    timeout: TimeDelta,
) -> ClaimDecision {
    match existing {
        Some(lease) if lease.token == *own => ClaimDecision::Claim {
            lease: lease.refreshed(now),
        },
        Some(lease) if !lease.is_stale(now, timeout) => ClaimDecision::Defer {
            holder: lease.token.clone(),
        },
        _ => ClaimDecision::Claim {
            lease: MasterLease::claimed(own.clone(), now),
        },
    }
}

/// Outcome of a master's heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatDecision {
    /// Still ours (or gone/stale and re-assertable): write this lease.
    Refresh { lease: MasterLease },
    /// A live lease carries another token: we lost a claim race and must
    /// step down.
    StepDown { usurper: TabToken },
}

/// Decide what a tab that believes itself master should do this tick.
#[must_use]
pub fn heartbeat_decision(
    existing: Option<&MasterLease>,
    own: &TabToken,
    now: DateTime<Utc>,
    timeout: TimeDelta,
) -> HeartbeatDecision {
    match existing {
        Some(lease) if lease.token == *own => HeartbeatDecision::Refresh {
            lease: lease.refreshed(now),
        },
        Some(lease) if !lease.is_stale(now, timeout) => HeartbeatDecision::StepDown {
            usurper: lease.token.clone(),
        },
        // Record vanished or went stale under us: re-assert. The prior
        // record is gone, so registration restarts.
        _ => HeartbeatDecision::Refresh {
            lease: MasterLease::claimed(own.clone(), now),
        },
    }
}

// ---------------------------------------------------------------------------
// Tab role
// ---------------------------------------------------------------------------

/// Where this tab stands in the election.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabRole {
    #[default]
    Unclaimed,
    Master,
    Blocked,
}

impl TabRole {
    pub fn is_master(self) -> bool {
        self == Self::Master
    }
}

/// Election-relevant happenings. Bus messages carrying the tab's own token
/// are filtered out before they ever become events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    /// Our claim wrote and verified.
    ClaimSucceeded,
    /// Our claim was deferred or failed verification.
    ClaimLost,
    /// Another tab's heartbeat arrived on the bus.
    ForeignHeartbeat,
    /// Another tab announced it won an election.
    ForeignClaim,
    /// The master announced a graceful close.
    MasterReleased,
}

/// Pure role transition.
///
/// A foreign heartbeat or claim forces a non-master into Blocked right away
/// instead of waiting for its next store poll; a master ignores them, since
/// messages are hints, and a double-master is resolved against the store by
/// the next heartbeat tick. `MasterReleased` grants nothing by itself: the
/// observer still has to win a claim.
#[must_use]
pub fn transition_role(current: TabRole, event: RoleEvent) -> TabRole {
    match event {
        RoleEvent::ClaimSucceeded => TabRole::Master,
        RoleEvent::ClaimLost => TabRole::Blocked,
        RoleEvent::ForeignHeartbeat | RoleEvent::ForeignClaim => {
            if current.is_master() {
                current
            } else {
                TabRole::Blocked
            }
        }
        RoleEvent::MasterReleased => current,
    }
}

/// Takeover delay after a graceful close, spread deterministically per token
/// (FNV-1a) to break simultaneous claims between multiple waiting tabs.
#[must_use]
pub fn takeover_jitter_ms(token: &TabToken) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in token.as_str().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash % (MAX_TAKEOVER_JITTER_MS + 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
