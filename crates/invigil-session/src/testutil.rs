//! Test fixtures shared by the session-crate test modules.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use invigil_core::types::{
    AttemptId, AttemptStatus, AttemptSummary, CompletePayload, ExamPosition, ResumePayload,
    SyncPayload,
};

use crate::service::{AttemptService, ServiceError};

/// Configurable in-memory attempt service.
pub(crate) struct FakeService {
    start_instant: DateTime<Utc>,
    duration_secs: i64,
    sync_remaining: Mutex<i64>,
    sync_status: Mutex<AttemptStatus>,
    sync_position: Mutex<ExamPosition>,
    sync_fails: AtomicBool,
    complete_fails: AtomicBool,
    pub(crate) complete_calls: AtomicUsize,
}

impl FakeService {
    pub(crate) fn new(start_instant: DateTime<Utc>, duration_secs: i64) -> Self {
        Self {
            start_instant,
            duration_secs,
            sync_remaining: Mutex::new(duration_secs),
            sync_status: Mutex::new(AttemptStatus::InProgress),
            sync_position: Mutex::new(ExamPosition::default()),
            sync_fails: AtomicBool::new(false),
            complete_fails: AtomicBool::new(false),
            complete_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_sync_remaining(&self, secs: i64) {
        *self.sync_remaining.lock().expect("lock") = secs;
    }

    pub(crate) fn set_sync_status(&self, status: AttemptStatus) {
        *self.sync_status.lock().expect("lock") = status;
    }

    pub(crate) fn set_sync_position(&self, position: ExamPosition) {
        *self.sync_position.lock().expect("lock") = position;
    }

    pub(crate) fn fail_sync(&self, fail: bool) {
        self.sync_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_complete(&self, fail: bool) {
        self.complete_fails.store(fail, Ordering::SeqCst);
    }
}

impl AttemptService for FakeService {
    fn resume(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<ResumePayload, ServiceError>> + Send {
        let payload = ResumePayload {
            server_time: Utc::now(),
            attempt: AttemptSummary {
                attempt_id: attempt_id.clone(),
                start_instant: self.start_instant,
                duration_seconds: self.duration_secs,
                current_section_index: 0,
                current_question_index: 0,
                question_ids: vec!["q-1".to_owned(), "q-2".to_owned()],
            },
            remaining_time: self.duration_secs,
        };
        async move { Ok(payload) }
    }

    fn sync(
        &self,
        _attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<SyncPayload, ServiceError>> + Send {
        let result = if self.sync_fails.load(Ordering::SeqCst) {
            Err(ServiceError::Transport("sync unreachable".to_owned()))
        } else {
            let position = *self.sync_position.lock().expect("lock");
            Ok(SyncPayload {
                server_time: Utc::now(),
                remaining_time: *self.sync_remaining.lock().expect("lock"),
                current_section_index: position.section_index,
                current_question_index: position.question_index,
                status: *self.sync_status.lock().expect("lock"),
            })
        };
        async move { result }
    }

    fn complete(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<CompletePayload, ServiceError>> + Send {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.complete_fails.load(Ordering::SeqCst) {
            Err(ServiceError::Transport("complete unreachable".to_owned()))
        } else {
            Ok(CompletePayload {
                attempt_id: attempt_id.clone(),
                status: AttemptStatus::Completed,
                score: 42.0,
                max_score: 100.0,
            })
        };
        async move { result }
    }
}
