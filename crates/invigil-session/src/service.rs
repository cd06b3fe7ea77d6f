//! The remote attempt service as consumed by a tab session.
//!
//! The server owns attempt rows, start time, remaining time, position, and
//! final status; this client only reads them and reports completion.

use std::future::Future;

use invigil_core::types::{AttemptId, CompletePayload, ResumePayload, SyncPayload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("attempt service unreachable: {0}")]
    Transport(String),

    #[error("attempt service rejected the request: {0}")]
    Rejected(String),

    #[error("malformed service response: {0}")]
    Malformed(String),
}

/// Async interface to the authoritative exam-attempt store.
pub trait AttemptService: Send + Sync + 'static {
    /// Load or restart the attempt: authoritative start instant, duration,
    /// position, and remaining time.
    fn resume(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<ResumePayload, ServiceError>> + Send;

    /// Current attempt status for periodic reconciliation.
    fn sync(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<SyncPayload, ServiceError>> + Send;

    /// Finish the attempt and retrieve the final score.
    fn complete(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<CompletePayload, ServiceError>> + Send;
}
