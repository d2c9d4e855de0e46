//! Background scheduling of sync passes.
//!
//! The scheduler owns an explicit state machine:
//!
//! ```text
//! Idle ──trigger──▶ Running ──pass done──▶ Idle
//!                      │
//!                      └──fatal error──▶ Halted ──resume()──▶ Idle
//! ```
//!
//! Entering `Running` is a single compare-and-swap, so however many
//! triggers race only one pass runs; the losers are coalesced into the
//! running pass.

use crate::connectivity::Connectivity;
use crate::engine::{SyncEngine, SyncReport};
use crate::shutdown::CancelSignal;
use crate::transport::RemoteAuthority;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    /// No pass running.
    Idle,
    /// A pass is in flight.
    Running,
    /// Stopped after a fatal error; waits for [`SyncScheduler::resume`].
    Halted,
}

impl SchedulerState {
    fn to_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Running => 1,
            SchedulerState::Halted => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Running,
            2 => SchedulerState::Halted,
            _ => SchedulerState::Idle,
        }
    }
}

/// What happened to a request to run a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A pass ran.
    Completed(SyncReport),
    /// Another pass was already running.
    Coalesced,
    /// The remote was unreachable; no pass ran.
    Offline,
    /// The scheduler is halted.
    Halted,
}

/// Returns the state to `Idle` when a pass ends, unless it was halted.
struct RunningGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let _ = self.state.compare_exchange(
            SchedulerState::Running.to_u8(),
            SchedulerState::Idle.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Drives sync passes on a timer, on reconnect and on request.
pub struct SyncScheduler<R: RemoteAuthority> {
    engine: Arc<SyncEngine<R>>,
    connectivity: Arc<dyn Connectivity>,
    state: AtomicU8,
    trigger: Notify,
    results: watch::Sender<Option<SyncReport>>,
    shutdown: CancelSignal,
}

impl<R: RemoteAuthority + 'static> SyncScheduler<R> {
    /// Creates an idle scheduler.
    pub fn new(engine: Arc<SyncEngine<R>>, connectivity: Arc<dyn Connectivity>) -> Arc<Self> {
        let (results, _) = watch::channel(None);
        Arc::new(Self {
            engine,
            connectivity,
            state: AtomicU8::new(SchedulerState::Idle.to_u8()),
            trigger: Notify::new(),
            results,
            shutdown: CancelSignal::new(),
        })
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Returns the current state.
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the report of the last pass that ran.
    pub fn last_result(&self) -> Option<SyncReport> {
        self.results.borrow().clone()
    }

    /// Subscribes to pass reports.
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncReport>> {
        self.results.subscribe()
    }

    /// Asks the background loop to run a pass soon.
    ///
    /// Returns immediately. A request made while a pass is running is
    /// coalesced into that pass and schedules nothing further.
    pub fn trigger_sync(&self) {
        if self.state() == SchedulerState::Running {
            debug!("pass in flight; trigger coalesced");
            return;
        }
        self.trigger.notify_one();
    }

    /// Runs a pass now unless one is already running.
    pub async fn sync_now(&self) -> TriggerOutcome {
        let current = self.state();
        if current == SchedulerState::Halted {
            return TriggerOutcome::Halted;
        }
        if self
            .state
            .compare_exchange(
                SchedulerState::Idle.to_u8(),
                SchedulerState::Running.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return match self.state() {
                SchedulerState::Halted => TriggerOutcome::Halted,
                _ => TriggerOutcome::Coalesced,
            };
        }
        let _guard = RunningGuard { state: &self.state };

        if !self.connectivity.is_reachable() {
            debug!("remote unreachable; skipping pass");
            return TriggerOutcome::Offline;
        }

        let report = self.engine.run_pass(&self.shutdown).await;
        if report.fatal {
            self.state
                .store(SchedulerState::Halted.to_u8(), Ordering::Release);
            error!(
                error = report.message.as_deref().unwrap_or(""),
                "sync halted; call resume() once storage is repaired"
            );
        }
        self.results.send_replace(Some(report.clone()));
        TriggerOutcome::Completed(report)
    }

    /// Leaves the halted state. Returns false if the scheduler was not
    /// halted.
    pub fn resume(&self) -> bool {
        let resumed = self
            .state
            .compare_exchange(
                SchedulerState::Halted.to_u8(),
                SchedulerState::Idle.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if resumed {
            info!("sync resumed");
        }
        resumed
    }

    /// Stops the background loop and cancels any pass in flight.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Starts the background loop on the current tokio runtime.
    ///
    /// The loop runs a pass at start-up, then on every interval tick,
    /// every [`trigger_sync`](Self::trigger_sync) and every transition from
    /// unreachable to reachable, until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await })
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.engine.config().sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reachability = self.connectivity.subscribe();
        let mut was_reachable = *reachability.borrow_and_update();
        let mut watching = true;

        info!(
            interval_ms = self.engine.config().sync_interval.as_millis() as u64,
            "sync scheduler started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => debug!("manual sync requested"),
                changed = reachability.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let now = *reachability.borrow_and_update();
                    let restored = now && !was_reachable;
                    was_reachable = now;
                    if !restored {
                        continue;
                    }
                    info!("connectivity restored");
                }
            }

            match self.sync_now().await {
                TriggerOutcome::Completed(_) | TriggerOutcome::Offline => {}
                TriggerOutcome::Coalesced => debug!("pass already running"),
                TriggerOutcome::Halted => debug!("scheduler halted; trigger ignored"),
            }
        }
        info!("sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::connectivity::ManualConnectivity;
    use crate::transport::MockRemote;
    use std::time::Duration;
    use tillsync_protocol::{DeviceId, EntityId};
    use tillsync_store::{ChangeKind, LocalStore, MemoryBackend, StoreConfig, SyncStatus};

    struct Fixture {
        scheduler: Arc<SyncScheduler<Arc<MockRemote>>>,
        remote: Arc<MockRemote>,
        connectivity: Arc<ManualConnectivity>,
        backend: MemoryBackend,
    }

    fn fixture(interval: Duration) -> Fixture {
        let backend = MemoryBackend::new();
        let store = LocalStore::with_backend(
            Box::new(backend.clone()),
            DeviceId::new("till-1"),
            StoreConfig::default(),
        )
        .unwrap();
        let remote = Arc::new(MockRemote::new());
        let config = SyncConfig::new("till-1", "server")
            .with_sync_interval(interval)
            .with_retry(RetryConfig::no_retry());
        let engine = Arc::new(SyncEngine::new(config, Arc::new(store), Arc::clone(&remote)).unwrap());
        let connectivity = Arc::new(ManualConnectivity::online());
        let scheduler = SyncScheduler::new(engine, connectivity.clone());
        Fixture {
            scheduler,
            remote,
            connectivity,
            backend,
        }
    }

    async fn wait_for_idle(fixture: &Fixture) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while fixture.scheduler.state() != SchedulerState::Idle {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn capture(fixture: &Fixture, id: &str) {
        fixture
            .scheduler
            .engine()
            .store()
            .write(|txn| {
                txn.track_raw(ChangeKind::Added, "sale", EntityId::new(id), b"{}".to_vec())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn offline_trigger_returns_to_idle() {
        let f = fixture(Duration::from_secs(3600));
        f.connectivity.set_reachable(false);

        assert_eq!(f.scheduler.sync_now().await, TriggerOutcome::Offline);
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert!(f.scheduler.last_result().is_none());
        assert_eq!(f.remote.push_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_triggers_are_coalesced() {
        let f = fixture(Duration::from_secs(3600));
        capture(&f, "s1");
        f.remote.set_delay(Some(Duration::from_millis(100)));

        let (first, second) = tokio::join!(f.scheduler.sync_now(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            f.scheduler.sync_now().await
        });

        assert!(matches!(first, TriggerOutcome::Completed(ref r) if r.success));
        assert_eq!(second, TriggerOutcome::Coalesced);
        assert_eq!(f.remote.push_calls(), 1);
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn failed_pass_still_returns_to_idle() {
        let f = fixture(Duration::from_secs(3600));
        capture(&f, "s1");
        f.remote.fail_pushes(1);

        let outcome = f.scheduler.sync_now().await;
        assert!(matches!(outcome, TriggerOutcome::Completed(ref r) if !r.success));
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert!(!f.scheduler.last_result().unwrap().success);
    }

    #[tokio::test]
    async fn fatal_storage_error_halts_until_resumed() {
        let f = fixture(Duration::from_secs(3600));
        capture(&f, "s1");
        f.backend.set_fail_writes(true);

        let outcome = f.scheduler.sync_now().await;
        assert!(matches!(outcome, TriggerOutcome::Completed(ref r) if r.fatal));
        assert_eq!(f.scheduler.state(), SchedulerState::Halted);
        assert_eq!(f.scheduler.sync_now().await, TriggerOutcome::Halted);

        assert!(f.scheduler.resume());
        assert!(!f.scheduler.resume());
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn reconnect_triggers_a_pass() {
        let f = fixture(Duration::from_secs(3600));
        f.connectivity.set_reachable(false);
        capture(&f, "s1");
        let mut results = f.scheduler.subscribe();
        let handle = f.scheduler.start();

        // The start-up tick finds the remote unreachable.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.remote.push_calls(), 0);

        f.connectivity.set_reachable(true);
        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();

        let report = f.scheduler.last_result().unwrap();
        assert!(report.success);
        assert_eq!(report.pushed, 1);
        let row = f
            .scheduler
            .engine()
            .store()
            .get("sale", &EntityId::new("s1"))
            .unwrap();
        assert_eq!(row.sync.sync_status, SyncStatus::Synced);

        f.scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn manual_trigger_runs_the_loop() {
        let f = fixture(Duration::from_secs(3600));
        let mut results = f.scheduler.subscribe();
        let handle = f.scheduler.start();

        // Start-up pass.
        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();

        wait_for_idle(&f).await;
        capture(&f, "s2");
        f.scheduler.trigger_sync();
        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.scheduler.last_result().unwrap().pushed, 1);

        f.scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn trigger_during_a_pass_adds_no_follow_up() {
        let f = fixture(Duration::from_secs(3600));
        let mut results = f.scheduler.subscribe();
        let handle = f.scheduler.start();
        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();
        wait_for_idle(&f).await;

        capture(&f, "s1");
        f.remote.set_delay(Some(Duration::from_millis(150)));
        f.scheduler.trigger_sync();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.scheduler.state(), SchedulerState::Running);
        for _ in 0..3 {
            f.scheduler.trigger_sync();
        }

        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();
        let pulls = f.remote.pull_calls();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(f.remote.pull_calls(), pulls);
        assert!(!results.has_changed().unwrap());
        assert_eq!(f.remote.push_calls(), 1);

        f.scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn captures_proceed_while_a_pass_is_stalled() {
        let f = fixture(Duration::from_secs(3600));
        capture(&f, "s1");
        f.remote.set_delay(Some(Duration::from_millis(300)));

        let scheduler = Arc::clone(&f.scheduler);
        let pass = tokio::spawn(async move { scheduler.sync_now().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.scheduler.state(), SchedulerState::Running);

        let store = Arc::clone(f.scheduler.engine().store());
        let write = tokio::task::spawn_blocking(move || {
            store.write(|txn| {
                txn.track_raw(ChangeKind::Added, "sale", EntityId::new("s2"), b"{}".to_vec())
            })
        });
        tokio::time::timeout(Duration::from_millis(100), write)
            .await
            .expect("capture waited for the pass")
            .unwrap()
            .unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Running);

        assert!(matches!(pass.await.unwrap(), TriggerOutcome::Completed(ref r) if r.success));
        f.remote.set_delay(None);
        assert!(matches!(f.scheduler.sync_now().await, TriggerOutcome::Completed(ref r) if r.success));

        let received = f.remote.received();
        assert!(received.iter().any(|r| r.entity_id == EntityId::new("s2")));
        assert_eq!(f.scheduler.engine().store().pending_count(), 0);
    }
}
