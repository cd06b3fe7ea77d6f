//! Server reconciliation task: keeps the countdown honest against the
//! attempt service without generating excessive traffic.
//!
//! Ticks on a short check interval but only talks to the server when the
//! sync cadence has elapsed, or when a visibility-regained nudge arrives
//! (debounced by a settle delay). Network failures are contained at the
//! tick boundary: the countdown runs unsupervised until the next
//! successful sync.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{interval, sleep};

use invigil_core::sync::{SyncResolution, estimate_offset_ms, resolve_sync};
use invigil_core::types::AttemptId;

use crate::config::SessionConfig;
use crate::service::{AttemptService, ServiceError};
use crate::session::{SessionEvent, SessionShared};

pub(crate) struct SyncRunner<S> {
    pub(crate) attempt_id: AttemptId,
    pub(crate) service: Arc<S>,
    pub(crate) shared: Arc<Mutex<SessionShared>>,
    pub(crate) config: SessionConfig,
    pub(crate) events: mpsc::Sender<SessionEvent>,
}

impl<S: AttemptService> SyncRunner<S> {
    /// One reconciliation pass with failures contained.
    pub(crate) async fn sync_tick(&self) {
        if let Err(e) = self.sync_once().await {
            tracing::warn!("attempt sync failed: {e}");
        }
    }

    async fn sync_once(&self) -> Result<(), ServiceError> {
        let sent_at = Utc::now();
        let report = self.service.sync(&self.attempt_id).await?;
        let received_at = Utc::now();
        let offset_ms = estimate_offset_ms(report.server_time, sent_at, received_at);

        // Decide under the lock; emit after releasing it.
        let mut emitted: Vec<SessionEvent> = Vec::new();
        {
            let mut shared = self.shared.lock().await;
            if shared.finished {
                return Ok(());
            }
            let now = Utc::now();
            let snapshot = shared.timer.snapshot(now);
            match resolve_sync(
                &snapshot,
                shared.position,
                &report,
                offset_ms,
                self.config.drift_threshold_ms(),
            ) {
                SyncResolution::Finished(status) => {
                    // Server status is authoritative over the local
                    // countdown, no matter how much time it still shows.
                    shared.finished = true;
                    emitted.push(SessionEvent::Finished(status));
                }
                SyncResolution::Continue {
                    correction,
                    position,
                } => {
                    if let Some(correction) = correction {
                        tracing::debug!(
                            drift_ms = correction.drift_ms,
                            "correcting countdown from server"
                        );
                        shared.timer = shared.timer.correct(
                            now,
                            correction.remaining_secs,
                            correction.clock_offset_ms,
                        );
                        emitted.push(SessionEvent::Corrected {
                            drift_ms: correction.drift_ms,
                        });
                    } else {
                        shared.timer = shared.timer.synced(now);
                    }
                    if let Some(position) = position {
                        shared.position = position;
                        emitted.push(SessionEvent::PositionChanged(position));
                    }
                }
            }
        }
        for event in emitted {
            let _ = self.events.send(event).await;
        }
        Ok(())
    }

    pub(crate) async fn run(
        self,
        mut nudges: mpsc::Receiver<()>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(self.config.sync_check_interval);
        let mut nudges_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let due = {
                        let shared = self.shared.lock().await;
                        !shared.finished
                            && shared
                                .timer
                                .needs_sync(Utc::now(), self.config.sync_cadence_delta())
                    };
                    if due {
                        self.sync_tick().await;
                    }
                }
                nudge = nudges.recv(), if nudges_open => {
                    match nudge {
                        Some(()) => {
                            // A regained tab fires a burst of wakeups;
                            // settle and coalesce before reconciling.
                            sleep(self.config.settle_delay).await;
                            while nudges.try_recv().is_ok() {}
                            self.sync_tick().await;
                        }
                        None => nudges_open = false,
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
