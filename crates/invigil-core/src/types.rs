//! Shared identity, status, wire, and bus-message types for the attempt
//! client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ─── Identity ─────────────────────────────────────────────────────

/// Identifier of one exam attempt (one user taking one exam).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one tab session. Minted once per session start, stable for
/// that session's lifetime, never reused across page loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabToken(String);

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

impl TabToken {
    /// Mint a fresh token: PID + unix nanoseconds + a process-local counter,
    /// so two tokens minted in the same nanosecond still differ.
    pub fn generate() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{nanos}-{seq}", std::process::id()))
    }

    /// Wrap a known token value (tests, replay).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Attempt status ───────────────────────────────────────────────

/// Server-reported lifecycle state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    TimedOut,
}

impl AttemptStatus {
    pub const ALL: [Self; 3] = [Self::InProgress, Self::Completed, Self::TimedOut];

    /// A final status overrules the local countdown unconditionally.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Exam position ────────────────────────────────────────────────

/// Cursor into the exam: current section and question within it.
/// The server is the source of truth for this; the client only displays it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExamPosition {
    pub section_index: u32,
    pub question_index: u32,
}

impl ExamPosition {
    pub fn new(section_index: u32, question_index: u32) -> Self {
        Self {
            section_index,
            question_index,
        }
    }
}

// ─── Wire payloads ────────────────────────────────────────────────

/// Attempt row as returned by the resume endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub attempt_id: AttemptId,
    /// Server wall-clock instant the attempt began.
    pub start_instant: DateTime<Utc>,
    pub duration_seconds: i64,
    pub current_section_index: u32,
    pub current_question_index: u32,
    pub question_ids: Vec<String>,
}

impl AttemptSummary {
    pub fn position(&self) -> ExamPosition {
        ExamPosition::new(self.current_section_index, self.current_question_index)
    }
}

/// Response of the resume/start endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePayload {
    pub server_time: DateTime<Utc>,
    pub attempt: AttemptSummary,
    /// Remaining seconds as the server computes them.
    pub remaining_time: i64,
}

/// Response of the periodic sync endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub server_time: DateTime<Utc>,
    /// Remaining seconds as the server computes them.
    pub remaining_time: i64,
    pub current_section_index: u32,
    pub current_question_index: u32,
    pub status: AttemptStatus,
}

impl SyncPayload {
    pub fn position(&self) -> ExamPosition {
        ExamPosition::new(self.current_section_index, self.current_question_index)
    }
}

/// Final score payload returned by the complete endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub attempt_id: AttemptId,
    pub status: AttemptStatus,
    pub score: f64,
    pub max_score: f64,
}

// ─── Bus messages ─────────────────────────────────────────────────

/// Cross-tab notifications. Hints only: they shorten polling latency, but
/// the shared store stays the source of truth for mastership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabMessage {
    /// Liveness proof from the current master.
    Heartbeat { token: TabToken },
    /// Graceful close announcement from a master about to disappear.
    TabClosing { token: TabToken },
    /// A tab just won an election.
    MasterClaimed { token: TabToken },
}

impl TabMessage {
    pub fn token(&self) -> &TabToken {
        match self {
            Self::Heartbeat { token } | Self::TabClosing { token } | Self::MasterClaimed { token } => {
                token
            }
        }
    }

    /// True when the message was published by `token` itself. Tabs never
    /// react to their own messages.
    pub fn is_from(&self, token: &TabToken) -> bool {
        self.token() == token
    }
}

// ─── Tests ────────────────────────────────────────────────────────
