//! Session orchestration: composes the countdown engine, the server
//! reconciliation protocol, and the tab leadership election for one attempt.
//!
//! One [`ExamSession::start`] call per tab per attempt, by whoever owns the
//! session lifetime; teardown is the explicit [`SessionHandle::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

use invigil_core::lease::TabRole;
use invigil_core::sync::estimate_offset_ms;
use invigil_core::timer::TimerState;
use invigil_core::types::{AttemptId, AttemptStatus, CompletePayload, ExamPosition, TabToken};
use invigil_store::SharedStore;

use crate::bus::TabBus;
use crate::config::SessionConfig;
use crate::leadership::LeadershipRunner;
use crate::service::{AttemptService, ServiceError};
use crate::sync::SyncRunner;

// ---------------------------------------------------------------------------
// Shared state & events
// ---------------------------------------------------------------------------

/// Mutable state shared between the session's tasks.
pub(crate) struct SessionShared {
    pub(crate) timer: TimerState,
    pub(crate) position: ExamPosition,
    /// Set once the attempt is closed (server-confirmed or submitted);
    /// stops auto-submit and further corrections.
    pub(crate) finished: bool,
    /// One-shot latch for the expiry event.
    pub(crate) expiry_emitted: bool,
    /// True while an auto-submit call is in flight or has succeeded.
    pub(crate) submitting: bool,
}

/// Observable happenings of a tab session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// This tab became the driver of the attempt.
    MasterGained,
    /// Another tab holds the attempt; this tab is display-only.
    MasterLost,
    /// The countdown was rebased onto a server-confirmed remaining time.
    Corrected { drift_ms: i64 },
    /// The server moved the exam position; local state was overwritten.
    PositionChanged(ExamPosition),
    /// The countdown ran out locally.
    Expired,
    /// Expiry auto-submit succeeded (master tab only).
    AutoSubmitted(CompletePayload),
    /// Expiry auto-submit failed; it is retried on the next tick.
    CompleteFailed(String),
    /// The server reported the attempt closed; leave the active-test UI.
    Finished(AttemptStatus),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct ExamSession;

impl ExamSession {
    /// Start a tab session: resume the attempt from the server, build the
    /// countdown, and spawn the leadership, reconciliation, and countdown
    /// tasks.
    pub async fn start<S: AttemptService>(
        config: SessionConfig,
        attempt_id: AttemptId,
        service: Arc<S>,
        store: Arc<dyn SharedStore>,
        bus: Option<TabBus>,
    ) -> Result<SessionHandle<S>, ServiceError> {
        let token = TabToken::generate();

        // The resume round trip doubles as the first clock-offset sample.
        let sent_at = Utc::now();
        let resume = service.resume(&attempt_id).await?;
        let received_at = Utc::now();
        let offset_ms = estimate_offset_ms(resume.server_time, sent_at, received_at);

        let now = Utc::now();
        let timer = TimerState::new(
            resume.attempt.start_instant,
            resume.attempt.duration_seconds,
            offset_ms,
            now,
        );
        let initial_remaining = timer.snapshot(now).remaining_ms;
        tracing::info!(
            attempt = %attempt_id,
            remaining_secs = initial_remaining / 1_000,
            offset_ms,
            "attempt resumed"
        );

        let shared = Arc::new(Mutex::new(SessionShared {
            timer,
            position: resume.attempt.position(),
            finished: false,
            expiry_emitted: false,
            submitting: false,
        }));

        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(32);
        let (nudge_tx, nudge_rx) = mpsc::channel(8);
        let (remaining_tx, remaining_rx) = watch::channel(initial_remaining);

        let (leadership, role_rx) = LeadershipRunner::new(
            attempt_id.clone(),
            token.clone(),
            store,
            bus,
            config.clone(),
        );
        let leadership_task = tokio::spawn(leadership.run(stop_rx.clone()));

        let sync_runner = SyncRunner {
            attempt_id: attempt_id.clone(),
            service: Arc::clone(&service),
            shared: Arc::clone(&shared),
            config: config.clone(),
            events: events_tx.clone(),
        };
        let sync_task = tokio::spawn(sync_runner.run(nudge_rx, stop_rx.clone()));

        let pump = StatePump {
            attempt_id: attempt_id.clone(),
            service: Arc::clone(&service),
            shared: Arc::clone(&shared),
            role_rx: role_rx.clone(),
            remaining_tx,
            events: events_tx,
            countdown_interval: config.countdown_interval,
        };
        let pump_task = tokio::spawn(pump.run(stop_rx));

        Ok(SessionHandle {
            attempt_id,
            token,
            service,
            shared,
            role_rx,
            remaining_rx,
            events: events_rx,
            nudge_tx,
            stop_tx,
            tasks: vec![leadership_task, sync_task, pump_task],
            notice_dismissed: false,
        })
    }
}

// ---------------------------------------------------------------------------
// State pump
// ---------------------------------------------------------------------------

/// Publishes the per-second countdown, relays role changes as events, and
/// drives expiry auto-submit on the master tab.
struct StatePump<S> {
    attempt_id: AttemptId,
    service: Arc<S>,
    shared: Arc<Mutex<SessionShared>>,
    role_rx: watch::Receiver<TabRole>,
    remaining_tx: watch::Sender<i64>,
    events: mpsc::Sender<SessionEvent>,
    countdown_interval: Duration,
}

impl<S: AttemptService> StatePump<S> {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.countdown_interval);
        // Separate watch clone so the countdown's own role reads never
        // contend with the change notifications. The initial claim may have
        // resolved before this task got polled, so force one observation and
        // dedupe against the last emitted role.
        let mut role_watch = self.role_rx.clone();
        role_watch.mark_changed();
        let mut last_emitted = TabRole::Unclaimed;
        let mut role_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.countdown_tick().await,
                changed = role_watch.changed(), if role_open => {
                    match changed {
                        Ok(()) => {
                            let role = *role_watch.borrow_and_update();
                            if role != last_emitted && role != TabRole::Unclaimed {
                                last_emitted = role;
                                let event = if role.is_master() {
                                    SessionEvent::MasterGained
                                } else {
                                    SessionEvent::MasterLost
                                };
                                let _ = self.events.send(event).await;
                            }
                        }
                        // Leadership ended; the ticker keeps the countdown
                        // alive.
                        Err(_) => role_open = false,
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }

    async fn countdown_tick(&self) {
        // Decide under the lock; talk to the network outside it.
        let action = {
            let mut shared = self.shared.lock().await;
            let snapshot = shared.timer.snapshot(Utc::now());
            let _ = self.remaining_tx.send(snapshot.remaining_ms);

            if !snapshot.expired || shared.finished {
                None
            } else {
                let expired_now = if shared.expiry_emitted {
                    false
                } else {
                    shared.expiry_emitted = true;
                    true
                };
                // Only the master is authorized to submit completion.
                let should_submit = self.role_rx.borrow().is_master() && !shared.submitting;
                if should_submit {
                    shared.submitting = true;
                }
                Some((expired_now, should_submit))
            }
        };

        let Some((expired_now, should_submit)) = action else {
            return;
        };
        if expired_now {
            let _ = self.events.send(SessionEvent::Expired).await;
        }
        if !should_submit {
            return;
        }

        match self.service.complete(&self.attempt_id).await {
            Ok(payload) => {
                self.shared.lock().await.finished = true;
                tracing::info!(attempt = %self.attempt_id, "attempt auto-submitted on expiry");
                let _ = self.events.send(SessionEvent::AutoSubmitted(payload)).await;
            }
            Err(e) => {
                // Surface the failure and re-arm so the next tick retries.
                self.shared.lock().await.submitting = false;
                tracing::warn!("auto-submit failed: {e}");
                let _ = self
                    .events
                    .send(SessionEvent::CompleteFailed(e.to_string()))
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side handle to a running tab session.
pub struct SessionHandle<S: AttemptService> {
    attempt_id: AttemptId,
    token: TabToken,
    service: Arc<S>,
    shared: Arc<Mutex<SessionShared>>,
    role_rx: watch::Receiver<TabRole>,
    remaining_rx: watch::Receiver<i64>,
    events: mpsc::Receiver<SessionEvent>,
    nudge_tx: mpsc::Sender<()>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    notice_dismissed: bool,
}

impl<S: AttemptService> SessionHandle<S> {
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    pub fn token(&self) -> &TabToken {
        &self.token
    }

    /// Latest published remaining time in milliseconds.
    pub fn remaining_ms(&self) -> i64 {
        *self.remaining_rx.borrow()
    }

    pub fn remaining_watch(&self) -> watch::Receiver<i64> {
        self.remaining_rx.clone()
    }

    pub fn role(&self) -> TabRole {
        *self.role_rx.borrow()
    }

    /// True when another tab drives this attempt.
    pub fn is_blocked(&self) -> bool {
        self.role() == TabRole::Blocked
    }

    pub fn role_watch(&self) -> watch::Receiver<TabRole> {
        self.role_rx.clone()
    }

    /// Next session event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Signal that the tab regained visibility; the reconciliation task
    /// syncs after a short settle delay.
    pub fn nudge_sync(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    /// Hide the "another tab has this test open" notice locally. Never
    /// forces a takeover: an uninstructed takeover would enable exactly
    /// the double-tab abuse the election prevents.
    pub fn dismiss_notice(&mut self) {
        self.notice_dismissed = true;
    }

    pub fn show_blocked_notice(&self) -> bool {
        self.is_blocked() && !self.notice_dismissed
    }

    /// User-initiated completion. Errors propagate to the caller for
    /// display, unlike background sync failures.
    pub async fn finish(&self) -> Result<CompletePayload, ServiceError> {
        let payload = self.service.complete(&self.attempt_id).await?;
        self.shared.lock().await.finished = true;
        Ok(payload)
    }

    /// Stop all periodic work, release the lease gracefully, and wait for
    /// the tasks to wind down.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
