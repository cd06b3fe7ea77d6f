//! Tab leadership: elects one master tab per attempt, detects master
//! failure via lease heartbeats, and hands leadership off on graceful close.
//!
//! The shared store is ground truth; the bus only shortens the latency of
//! observing it. Every decision here is re-derived from a fresh store read
//! on the next tick, so out-of-order bus delivery is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, sleep};

use invigil_core::lease::{
    ClaimDecision, HeartbeatDecision, RoleEvent, TabRole, claim_decision, heartbeat_decision,
    takeover_jitter_ms, transition_role,
};
use invigil_core::types::{AttemptId, TabMessage, TabToken};
use invigil_store::{SharedStore, clear_lease, read_lease, write_lease};

use crate::bus::{BusSubscription, TabBus};
use crate::config::SessionConfig;

/// Runs the election for one tab session. Owned by the session; started
/// once, stopped through the session's stop signal.
pub struct LeadershipRunner {
    attempt_id: AttemptId,
    token: TabToken,
    store: Arc<dyn SharedStore>,
    bus: Option<TabBus>,
    config: SessionConfig,
    role_tx: watch::Sender<TabRole>,
}

impl LeadershipRunner {
    pub fn new(
        attempt_id: AttemptId,
        token: TabToken,
        store: Arc<dyn SharedStore>,
        bus: Option<TabBus>,
        config: SessionConfig,
    ) -> (Self, watch::Receiver<TabRole>) {
        let (role_tx, role_rx) = watch::channel(TabRole::Unclaimed);
        (
            Self {
                attempt_id,
                token,
                store,
                bus,
                config,
                role_tx,
            },
            role_rx,
        )
    }

    pub fn token(&self) -> &TabToken {
        &self.token
    }

    pub fn role(&self) -> TabRole {
        *self.role_tx.borrow()
    }

    fn set_role(&self, role: TabRole) {
        self.role_tx.send_if_modified(|current| {
            if *current == role {
                false
            } else {
                *current = role;
                true
            }
        });
    }

    fn publish(&self, message: TabMessage) {
        if let Some(bus) = &self.bus {
            bus.publish(message);
        }
    }

    /// One claim pass: decide from a fresh read, write, then verify by
    /// re-reading. The store has no transactions, so only the token that
    /// reads back is trusted; a write that did not stick means another tab
    /// won. A failing store degrades to assuming we are the only tab.
    pub fn try_claim(&self) -> TabRole {
        let now = Utc::now();
        let timeout = self.config.heartbeat_timeout_delta();

        let existing = match read_lease(self.store.as_ref(), &self.attempt_id) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::debug!("lease store unavailable, assuming single tab: {e}");
                self.set_role(TabRole::Master);
                return TabRole::Master;
            }
        };

        match claim_decision(existing.as_ref(), &self.token, now, timeout) {
            ClaimDecision::Defer { holder } => {
                tracing::debug!(holder = %holder, "lease held by another tab, blocking");
                self.set_role(transition_role(self.role(), RoleEvent::ClaimLost));
                TabRole::Blocked
            }
            ClaimDecision::Claim { lease } => {
                if let Err(e) = write_lease(self.store.as_ref(), &self.attempt_id, &lease) {
                    tracing::debug!("lease write failed, assuming single tab: {e}");
                    self.set_role(TabRole::Master);
                    return TabRole::Master;
                }

                let verified = matches!(
                    read_lease(self.store.as_ref(), &self.attempt_id),
                    Ok(Some(read_back)) if read_back.token == self.token
                );
                if verified {
                    let was_master = self.role().is_master();
                    self.set_role(transition_role(self.role(), RoleEvent::ClaimSucceeded));
                    if !was_master {
                        tracing::info!(attempt = %self.attempt_id, "claimed tab mastership");
                        self.publish(TabMessage::MasterClaimed {
                            token: self.token.clone(),
                        });
                    }
                    TabRole::Master
                } else {
                    self.set_role(transition_role(self.role(), RoleEvent::ClaimLost));
                    TabRole::Blocked
                }
            }
        }
    }

    /// Master tick: refresh the lease, or step down if a live foreign lease
    /// shows we lost a claim race.
    pub(crate) fn heartbeat_tick(&self) {
        let now = Utc::now();
        let timeout = self.config.heartbeat_timeout_delta();

        let existing = match read_lease(self.store.as_ref(), &self.attempt_id) {
            Ok(existing) => existing,
            Err(e) => {
                // Store gone: keep driving as the presumed only tab.
                tracing::debug!("lease store unavailable during heartbeat: {e}");
                return;
            }
        };

        match heartbeat_decision(existing.as_ref(), &self.token, now, timeout) {
            HeartbeatDecision::Refresh { lease } => {
                match write_lease(self.store.as_ref(), &self.attempt_id, &lease) {
                    Ok(()) => self.publish(TabMessage::Heartbeat {
                        token: self.token.clone(),
                    }),
                    Err(e) => {
                        // Retry on the next tick; blocked tabs tolerate one
                        // missed heartbeat inside the timeout budget.
                        tracing::debug!("heartbeat write failed: {e}");
                    }
                }
            }
            HeartbeatDecision::StepDown { usurper } => {
                tracing::warn!(usurper = %usurper, "another tab holds the lease, stepping down");
                self.set_role(transition_role(self.role(), RoleEvent::ClaimLost));
            }
        }
    }

    /// Graceful release: delete our lease (if still ours) and tell waiting
    /// tabs, so takeover does not have to wait out the heartbeat timeout.
    /// Best-effort: correctness is carried by the timeout if this never
    /// runs.
    pub fn release(&self) {
        if !self.role().is_master() {
            return;
        }
        let owned = matches!(
            read_lease(self.store.as_ref(), &self.attempt_id),
            Ok(Some(lease)) if lease.token == self.token
        );
        if owned {
            if let Err(e) = clear_lease(self.store.as_ref(), &self.attempt_id) {
                tracing::debug!("lease delete failed on release: {e}");
            }
        }
        self.publish(TabMessage::TabClosing {
            token: self.token.clone(),
        });
        tracing::info!(attempt = %self.attempt_id, "released tab mastership");
    }

    async fn handle_message(&self, message: TabMessage) {
        match message {
            TabMessage::Heartbeat { .. } => {
                self.set_role(transition_role(self.role(), RoleEvent::ForeignHeartbeat));
            }
            TabMessage::MasterClaimed { .. } => {
                self.set_role(transition_role(self.role(), RoleEvent::ForeignClaim));
            }
            TabMessage::TabClosing { .. } => {
                if !self.role().is_master() {
                    // Spread simultaneous takeovers from multiple waiting
                    // tabs; the loser blocks again on verification.
                    sleep(Duration::from_millis(takeover_jitter_ms(&self.token))).await;
                    self.try_claim();
                }
            }
        }
    }

    /// Drive the election until the stop signal flips (or its sender goes
    /// away). Claims immediately, then heartbeats as master / polls for
    /// liveness as blocked, reacting to bus messages in between.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        self.try_claim();

        let mut subscription: Option<BusSubscription> =
            self.bus.as_ref().map(|bus| bus.subscribe(self.token.clone()));

        let mut heartbeat = interval(self.config.heartbeat_interval);
        let mut liveness = interval(self.config.liveness_interval);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if self.role().is_master() {
                        self.heartbeat_tick();
                    }
                }
                _ = liveness.tick() => {
                    if !self.role().is_master() {
                        self.try_claim();
                    }
                }
                message = recv_foreign(&mut subscription) => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            // Bus gone: degrade to store polling alone.
                            subscription = None;
                        }
                    }
                }
                _ = stop.changed() => break,
            }
        }

        self.release();
    }
}

/// Next foreign bus message, pending forever when there is no bus.
async fn recv_foreign(subscription: &mut Option<BusSubscription>) -> Option<TabMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use invigil_core::lease::MasterLease;
    use invigil_store::{MemoryStore, StoreError, lease_key};

    fn attempt() -> AttemptId {
        AttemptId::new("att-1")
    }

    fn runner_with(
        token: &str,
        store: Arc<dyn SharedStore>,
        bus: Option<TabBus>,
        config: SessionConfig,
    ) -> (LeadershipRunner, watch::Receiver<TabRole>) {
        LeadershipRunner::new(attempt(), TabToken::new(token), store, bus, config)
    }

    fn fast_config() -> SessionConfig {
        SessionConfig::default().with_heartbeat_interval(Duration::from_millis(100))
    }

    /// Store whose every operation fails (quota exceeded / disabled).
    struct FailingStore;

    impl SharedStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("disabled".to_owned()))
        }
        fn put(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disabled".to_owned()))
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disabled".to_owned()))
        }
    }

    // -- Claiming --

    #[tokio::test]
    async fn first_tab_becomes_master() {
        let store = Arc::new(MemoryStore::new());
        let (runner, role_rx) = runner_with("a", store, None, SessionConfig::default());

        assert_eq!(runner.try_claim(), TabRole::Master);
        assert_eq!(*role_rx.borrow(), TabRole::Master);
    }

    #[tokio::test]
    async fn second_tab_blocks_while_first_is_alive() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _a_role) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        let (b, b_role) = runner_with("b", Arc::clone(&store), None, SessionConfig::default());

        assert_eq!(a.try_claim(), TabRole::Master);
        assert_eq!(b.try_claim(), TabRole::Blocked);
        assert_eq!(*b_role.borrow(), TabRole::Blocked);
    }

    #[tokio::test]
    async fn sequential_race_elects_exactly_one_master() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        let (b, _) = runner_with("b", Arc::clone(&store), None, SessionConfig::default());

        let roles = [a.try_claim(), b.try_claim()];
        let masters = roles.iter().filter(|r| r.is_master()).count();
        assert_eq!(masters, 1, "exactly one of two racing tabs wins");
    }

    #[tokio::test]
    async fn adversarial_interleaving_resolves_by_next_heartbeat() {
        // The race the read-back verify cannot close: B's write lands after
        // A verified. Both believe they are master until A's next heartbeat
        // observes the live foreign token and steps down.
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, a_role) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        let (b, b_role) = runner_with("b", Arc::clone(&store), None, SessionConfig::default());

        assert_eq!(a.try_claim(), TabRole::Master);

        // B's interleaved write + verify.
        write_lease(
            store.as_ref(),
            &attempt(),
            &MasterLease::claimed(TabToken::new("b"), Utc::now()),
        )
        .expect("write");
        assert_eq!(b.try_claim(), TabRole::Master);

        // Double-master window is open.
        assert!(a_role.borrow().is_master());
        assert!(b_role.borrow().is_master());

        // A's next heartbeat resolves it.
        a.heartbeat_tick();
        assert_eq!(*a_role.borrow(), TabRole::Blocked);
        assert!(b_role.borrow().is_master());
    }

    #[tokio::test]
    async fn reclaim_preserves_registration_time() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());

        assert_eq!(a.try_claim(), TabRole::Master);
        let first = read_lease(store.as_ref(), &attempt())
            .expect("read")
            .expect("lease");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.try_claim(), TabRole::Master);
        let second = read_lease(store.as_ref(), &attempt())
            .expect("read")
            .expect("lease");

        assert_eq!(second.registered_at, first.registered_at);
        assert!(second.last_heartbeat >= first.last_heartbeat);
    }

    #[tokio::test]
    async fn stale_lease_is_taken_over() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let config = SessionConfig::default();

        // A lease whose heartbeat is far older than the 6s timeout.
        let old = Utc::now() - chrono::TimeDelta::seconds(60);
        store
            .put(
                &lease_key(&attempt()),
                &serde_json::to_string(&MasterLease::claimed(TabToken::new("dead"), old))
                    .expect("serialize"),
            )
            .expect("seed");

        let (b, _) = runner_with("b", Arc::clone(&store), None, config);
        assert_eq!(b.try_claim(), TabRole::Master);
    }

    #[tokio::test]
    async fn failing_store_assumes_single_tab() {
        let store: Arc<dyn SharedStore> = Arc::new(FailingStore);
        let (a, role_rx) = runner_with("a", store, None, SessionConfig::default());

        assert_eq!(a.try_claim(), TabRole::Master);
        assert!(role_rx.borrow().is_master());
    }

    // -- Heartbeats --

    #[tokio::test]
    async fn heartbeat_refreshes_stored_lease() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        a.try_claim();
        let before = read_lease(store.as_ref(), &attempt())
            .expect("read")
            .expect("lease");

        tokio::time::sleep(Duration::from_millis(20)).await;
        a.heartbeat_tick();
        let after = read_lease(store.as_ref(), &attempt())
            .expect("read")
            .expect("lease");

        assert_eq!(after.token, before.token);
        assert_eq!(after.registered_at, before.registered_at);
        assert!(after.last_heartbeat > before.last_heartbeat);
    }

    #[tokio::test]
    async fn heartbeat_publishes_on_bus() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = TabBus::new();
        let mut listener = bus.subscribe(TabToken::new("listener"));

        let (a, _) = runner_with(
            "a",
            Arc::clone(&store),
            Some(bus.clone()),
            SessionConfig::default(),
        );
        a.try_claim();

        // try_claim announces the election...
        assert_eq!(
            listener.recv().await,
            Some(TabMessage::MasterClaimed {
                token: TabToken::new("a"),
            })
        );

        // ...and each heartbeat tick proves liveness.
        a.heartbeat_tick();
        assert_eq!(
            listener.recv().await,
            Some(TabMessage::Heartbeat {
                token: TabToken::new("a"),
            })
        );
    }

    // -- Failover --

    #[tokio::test]
    async fn crashed_master_is_replaced_after_timeout() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        // 100ms heartbeat -> 300ms timeout.
        let mut config = fast_config();
        config.liveness_interval = Duration::from_millis(50);

        // A claims and then "crashes": no heartbeat loop ever runs for it.
        let (a, _) = runner_with("a", Arc::clone(&store), None, config.clone());
        assert_eq!(a.try_claim(), TabRole::Master);

        let (b, b_role) = runner_with("b", Arc::clone(&store), None, config);
        let (stop_tx, stop_rx) = watch::channel(false);
        let b_task = tokio::spawn(b.run(stop_rx));

        // Before the timeout the lease is still honored.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*b_role.borrow(), TabRole::Blocked, "not sooner");

        // Past timeout + liveness interval the survivor takes over.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(b_role.borrow().is_master(), "never never");

        let _ = stop_tx.send(true);
        let _ = b_task.await;
    }

    #[tokio::test]
    async fn graceful_release_hands_over_without_waiting_for_timeout() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = TabBus::new();
        // Long heartbeat timeout: only the tab-closing fast path can elect B
        // within this test.
        let config = SessionConfig::default().with_heartbeat_interval(Duration::from_secs(10));

        let (a, _) = runner_with("a", Arc::clone(&store), Some(bus.clone()), config.clone());
        assert_eq!(a.try_claim(), TabRole::Master);

        let (b, b_role) = runner_with("b", Arc::clone(&store), Some(bus.clone()), config);
        let (stop_tx, stop_rx) = watch::channel(false);
        let b_task = tokio::spawn(b.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*b_role.borrow(), TabRole::Blocked);

        a.release();

        // Takeover is bounded by the jitter (<= 100ms), far under the 30s
        // timeout; allow generous slack for the scheduler.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(b_role.borrow().is_master(), "bus handoff beats the timeout");

        let _ = stop_tx.send(true);
        let _ = b_task.await;
    }

    #[tokio::test]
    async fn release_deletes_owned_lease() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        a.try_claim();
        assert!(read_lease(store.as_ref(), &attempt()).expect("read").is_some());

        a.release();
        assert_eq!(read_lease(store.as_ref(), &attempt()).expect("read"), None);
    }

    #[tokio::test]
    async fn release_leaves_foreign_lease_alone() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, _) = runner_with("a", Arc::clone(&store), None, SessionConfig::default());
        a.try_claim();

        // B overwrote the record in a race we lost but have not noticed yet.
        let foreign = MasterLease::claimed(TabToken::new("b"), Utc::now());
        write_lease(store.as_ref(), &attempt(), &foreign).expect("write");

        a.release();
        assert_eq!(
            read_lease(store.as_ref(), &attempt()).expect("read"),
            Some(foreign),
            "releasing must not delete another tab's lease"
        );
    }

    // -- Bus reactions --

    #[tokio::test]
    async fn foreign_heartbeat_blocks_non_master_immediately() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = TabBus::new();
        // Seed a live foreign lease so B's initial claim defers.
        write_lease(
            store.as_ref(),
            &attempt(),
            &MasterLease::claimed(TabToken::new("a"), Utc::now()),
        )
        .expect("seed");

        let (b, b_role) = runner_with(
            "b",
            Arc::clone(&store),
            Some(bus.clone()),
            SessionConfig::default().with_heartbeat_interval(Duration::from_secs(10)),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let b_task = tokio::spawn(b.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(TabMessage::Heartbeat {
            token: TabToken::new("a"),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*b_role.borrow(), TabRole::Blocked);

        let _ = stop_tx.send(true);
        let _ = b_task.await;
    }

    #[tokio::test]
    async fn stop_signal_releases_lease() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let (a, a_role) = runner_with("a", Arc::clone(&store), None, fast_config());
        let (stop_tx, stop_rx) = watch::channel(false);
        let a_task = tokio::spawn(a.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a_role.borrow().is_master());

        let _ = stop_tx.send(true);
        let _ = a_task.await;

        assert_eq!(
            read_lease(store.as_ref(), &attempt()).expect("read"),
            None,
            "graceful stop frees the lease"
        );
    }
}
