// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live sync lifecycle coordinator.
//!
//! Owns exactly one sync process per (workspace, peer) pair and drives it
//! between `Idle` and `Streaming` as the registries and the liveness flag
//! change.
//!
//! # Architecture
//!
//! ```text
//!  StoreRegistry ─┐
//!  PeerRegistry  ─┼─ on_change ──► refresh() ──► reconcile(desired, is_live)
//!  LivenessFlag  ─┘                                   │
//!                                                     ▼
//!                               ownership table: SyncPair → (storage, process, state)
//!                                                     │
//!                               SyncTransport::open / start_continuous / stop_push + stop_pull
//! ```
//!
//! # Reconcile
//!
//! 1. Owned pairs that are no longer desired (or whose store was replaced)
//!    are stopped if streaming and removed from the table.
//! 2. Desired pairs are started when live (opening a process if none is
//!    owned) and stopped when not. A `Streaming` pair is left alone, so
//!    reconcile is idempotent.
//!
//! Requests that arrive while a pass is running (a listener or transport
//! mutating a registry from inside a callback, or another thread) are
//! coalesced: the running pass applies the latest request before returning.
//! No lock is held while calling into the transport.
//!
//! # Failures
//!
//! A failed start, or an interruption the host reports through
//! [`report_interrupted`](LiveSyncCoordinator::report_interrupted), leaves
//! that pair `Idle` and is surfaced as [`PeerError::SyncProcess`]: in the
//! returned [`ReconcileReport`], on the [`failures`](LiveSyncCoordinator::failures)
//! broadcast channel, in the logs and in metrics. Other pairs and the
//! liveness flag are untouched; the next reconcile while live restarts the
//! pair.

mod types;

pub use types::{CoordinatorState, ProcessState, ReconcileReport, SyncPair};

use crate::bus::Unsubscribe;
use crate::config::CoordinatorSettings;
use crate::error::PeerError;
use crate::liveness::LivenessFlag;
use crate::metrics;
use crate::peer::PeerRegistry;
use crate::storage::SharedStorage;
use crate::store::StoreRegistry;
use crate::transport::{SyncProcess, SyncTransport};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

/// One entry of the ownership table.
struct OwnedProcess {
    storage: SharedStorage,
    process: Arc<dyn SyncProcess>,
    state: ProcessState,
}

enum Request {
    /// Read registries and liveness when the pass runs, not when requested.
    Refresh,
    Explicit {
        desired: IndexSet<SyncPair>,
        is_live: bool,
    },
}

struct Inner {
    stores: Arc<StoreRegistry>,
    peers: Arc<PeerRegistry>,
    liveness: Arc<LivenessFlag>,
    transport: Arc<dyn SyncTransport>,

    /// Ownership table (at most one process per pair)
    table: Mutex<IndexMap<SyncPair, OwnedProcess>>,

    /// Latest request not yet applied
    pending: Mutex<Option<Request>>,

    /// Set while a pass is running
    reconciling: AtomicBool,

    disposed: AtomicBool,
    state_tx: watch::Sender<CoordinatorState>,
    failures_tx: broadcast::Sender<PeerError>,
}

/// Drives sync processes from registry and liveness state.
///
/// Reacts synchronously: by the time `set_live`, a peer update or a
/// workspace registration returns, the table reflects it.
pub struct LiveSyncCoordinator {
    inner: Arc<Inner>,
    guards: Mutex<Vec<Unsubscribe>>,
}

impl LiveSyncCoordinator {
    /// Create a coordinator, attach it to the registries and run the first
    /// reconcile.
    pub fn new(
        stores: Arc<StoreRegistry>,
        peers: Arc<PeerRegistry>,
        liveness: Arc<LivenessFlag>,
        transport: Arc<dyn SyncTransport>,
        settings: &CoordinatorSettings,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(CoordinatorState::Active);
        let (failures_tx, _) = broadcast::channel(settings.failure_channel_capacity.max(1));
        metrics::set_coordinator_state("Active");

        let inner = Arc::new(Inner {
            stores,
            peers,
            liveness,
            transport,
            table: Mutex::new(IndexMap::new()),
            pending: Mutex::new(None),
            reconciling: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            state_tx,
            failures_tx,
        });

        let guards = vec![
            inner.stores.on_change(refresh_on_change(&inner)),
            inner.peers.on_change(refresh_on_change(&inner)),
            inner.liveness.on_change(refresh_on_change(&inner)),
        ];

        let coordinator = Self {
            inner,
            guards: Mutex::new(guards),
        };

        let report = coordinator.refresh();
        info!(
            live = coordinator.inner.liveness.is_live(),
            pairs = coordinator.inner.desired_pairs().len(),
            started = report.started.len(),
            "Live sync coordinator started"
        );
        coordinator
    }

    /// Get current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.inner.state_tx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Receiver for isolated sync failures.
    pub fn failures(&self) -> broadcast::Receiver<PeerError> {
        self.inner.failures_tx.subscribe()
    }

    /// Every registered workspace × its peers.
    pub fn desired_pairs(&self) -> IndexSet<SyncPair> {
        self.inner.desired_pairs()
    }

    /// Reconcile against the current registries and liveness flag.
    pub fn refresh(&self) -> ReconcileReport {
        self.inner.refresh()
    }

    /// Bring the ownership table in line with `desired` and `is_live`.
    ///
    /// Idempotent. Pairs whose workspace has no registered store are skipped.
    /// When called while another pass is running, the request is handed to
    /// that pass and an empty report is returned.
    pub fn reconcile(
        &self,
        desired: impl IntoIterator<Item = SyncPair>,
        is_live: bool,
    ) -> ReconcileReport {
        self.inner.reconcile(Request::Explicit {
            desired: desired.into_iter().collect(),
            is_live,
        })
    }

    /// State of an owned pair; `None` if the coordinator owns no process for it.
    pub fn process_state(&self, pair: &SyncPair) -> Option<ProcessState> {
        self.inner.table.lock().get(pair).map(|owned| owned.state)
    }

    /// Pairs currently streaming.
    pub fn streaming_pairs(&self) -> Vec<SyncPair> {
        self.inner
            .table
            .lock()
            .iter()
            .filter(|(_, owned)| owned.state == ProcessState::Streaming)
            .map(|(pair, _)| pair.clone())
            .collect()
    }

    /// Pairs with an owned process, streaming or idle.
    pub fn owned_pairs(&self) -> Vec<SyncPair> {
        self.inner.table.lock().keys().cloned().collect()
    }

    /// The transport reports that a streaming pair stopped on its own.
    ///
    /// The pair's process is stopped in both directions and rests in `Idle`
    /// until the next reconcile. Returns `false` if the pair was not
    /// streaming.
    pub fn report_interrupted(&self, workspace: &str, peer: &str, message: impl Into<String>) -> bool {
        let pair = SyncPair::new(workspace, peer);
        let process = {
            let table = self.inner.table.lock();
            match table.get(&pair) {
                Some(owned) if owned.state == ProcessState::Streaming => Some(Arc::clone(&owned.process)),
                _ => None,
            }
        };
        let Some(process) = process else {
            debug!(pair = %pair, "Interruption reported for a pair that is not streaming");
            return false;
        };

        // Still `Streaming` while stopping, so a concurrent pass cannot restart it early.
        stop(&pair, process.as_ref());
        let rested = match self.inner.table.lock().get_mut(&pair) {
            Some(owned) if owned.state == ProcessState::Streaming && Arc::ptr_eq(&owned.process, &process) => {
                owned.state = ProcessState::Idle;
                true
            }
            _ => false,
        };
        if !rested {
            return false;
        }
        let error = PeerError::sync_process(workspace, peer, message);
        self.inner.publish_failure(&pair, &error);
        metrics::set_streaming_processes(self.inner.streaming_count());
        true
    }

    /// Stop every owned process and detach from the registries. Terminal.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let guards = std::mem::take(&mut *self.guards.lock());
        drop(guards);

        let owned: Vec<(SyncPair, OwnedProcess)> = self.inner.table.lock().drain(..).collect();
        let count = owned.len();
        for (pair, owned) in owned {
            if owned.state == ProcessState::Streaming {
                stop(&pair, owned.process.as_ref());
            } else {
                halt(owned.process.as_ref());
            }
            metrics::record_sync_process_disposed(&pair.workspace);
        }
        self.inner.pending.lock().take();

        metrics::set_streaming_processes(0);
        let _ = self.inner.state_tx.send_replace(CoordinatorState::Disposed);
        metrics::set_coordinator_state("Disposed");
        info!(disposed = count, "Live sync coordinator disposed");
    }
}

impl Drop for LiveSyncCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LiveSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSyncCoordinator")
            .field("state", &self.state())
            .field("owned", &self.owned_pairs())
            .field("streaming", &self.streaming_pairs().len())
            .finish()
    }
}

fn refresh_on_change<E: 'static>(inner: &Arc<Inner>) -> impl Fn(&E) + Send + Sync + 'static {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    move |_: &E| {
        if let Some(inner) = weak.upgrade() {
            inner.refresh();
        }
    }
}

/// Stop both directions; the process counts as stopped only after both.
fn stop(pair: &SyncPair, process: &dyn SyncProcess) {
    halt(process);
    metrics::record_sync_process_stopped(&pair.workspace, &pair.peer);
    info!(workspace = %pair.workspace, peer = %pair.peer, "Sync process stopped");
}

/// Stop both directions of a process that may have half-started.
fn halt(process: &dyn SyncProcess) {
    process.stop_push();
    process.stop_pull();
}

impl Inner {
    fn desired_pairs(&self) -> IndexSet<SyncPair> {
        self.stores
            .list()
            .into_iter()
            .flat_map(|workspace| {
                self.peers
                    .get(&workspace)
                    .into_iter()
                    .map(move |peer| SyncPair::new(workspace.clone(), peer))
            })
            .collect()
    }

    fn refresh(&self) -> ReconcileReport {
        if self.disposed.load(Ordering::Acquire) {
            return ReconcileReport::default();
        }
        self.reconcile(Request::Refresh)
    }

    fn reconcile(&self, request: Request) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if self.disposed.load(Ordering::Acquire) {
            return report;
        }
        *self.pending.lock() = Some(request);

        loop {
            if self
                .reconciling
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                trace!("Reconcile request coalesced into running pass");
                return report;
            }

            loop {
                let next = self.pending.lock().take();
                let Some(request) = next else {
                    break;
                };
                report.merge(self.pass(request));
            }

            self.reconciling.store(false, Ordering::Release);
            // A request may have landed between the last take and the store.
            if self.pending.lock().is_none() {
                break;
            }
        }

        metrics::set_streaming_processes(self.streaming_count());
        if !report.is_noop() {
            debug!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                disposed = report.disposed.len(),
                failures = report.failures.len(),
                "Reconcile complete"
            );
        }
        report
    }

    fn pass(&self, request: Request) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if self.disposed.load(Ordering::Acquire) {
            return report;
        }

        let (desired, is_live) = match request {
            Request::Refresh => (self.desired_pairs(), self.liveness.is_live()),
            Request::Explicit { desired, is_live } => (desired, is_live),
        };

        let current: Vec<(SyncPair, SharedStorage)> = desired
            .into_iter()
            .filter_map(|pair| match self.stores.get(&pair.workspace) {
                Some(storage) => Some((pair, storage)),
                None => {
                    debug!(pair = %pair, "Skipping pair without a registered store");
                    None
                }
            })
            .collect();

        // Undesired pairs, and pairs bound to a store that has since been replaced.
        let retired: Vec<(SyncPair, OwnedProcess)> = {
            let mut table = self.table.lock();
            let keys: Vec<SyncPair> = table
                .iter()
                .filter(|(pair, owned)| {
                    !current
                        .iter()
                        .any(|(p, storage)| p == *pair && Arc::ptr_eq(storage, &owned.storage))
                })
                .map(|(pair, _)| pair.clone())
                .collect();
            keys.into_iter()
                .filter_map(|pair| table.shift_remove(&pair).map(|owned| (pair, owned)))
                .collect()
        };
        for (pair, owned) in retired {
            if owned.state == ProcessState::Streaming {
                stop(&pair, owned.process.as_ref());
                report.stopped.push(pair.clone());
            } else {
                halt(owned.process.as_ref());
            }
            metrics::record_sync_process_disposed(&pair.workspace);
            info!(workspace = %pair.workspace, peer = %pair.peer, "Sync process disposed");
            report.disposed.push(pair);
        }

        for (pair, storage) in current {
            if is_live {
                self.ensure_streaming(pair, storage, &mut report);
            } else {
                self.ensure_idle(pair, &mut report);
            }
        }
        report
    }

    fn ensure_streaming(&self, pair: SyncPair, storage: SharedStorage, report: &mut ReconcileReport) {
        let owned = {
            let table = self.table.lock();
            table
                .get(&pair)
                .map(|owned| (owned.state, Arc::clone(&owned.process)))
        };

        let process = match owned {
            Some((ProcessState::Streaming, _)) => return,
            Some((ProcessState::Idle, process)) => process,
            None => match self.transport.open(Arc::clone(&storage), &pair.peer) {
                Ok(process) => {
                    let process: Arc<dyn SyncProcess> = Arc::from(process);
                    let mut table = self.table.lock();
                    if self.disposed.load(Ordering::Acquire) {
                        return;
                    }
                    table.insert(
                        pair.clone(),
                        OwnedProcess {
                            storage,
                            process: Arc::clone(&process),
                            state: ProcessState::Idle,
                        },
                    );
                    debug!(workspace = %pair.workspace, peer = %pair.peer, "Sync process created");
                    process
                }
                Err(e) => {
                    let error = PeerError::sync_process(&pair.workspace, &pair.peer, e.to_string());
                    self.publish_failure(&pair, &error);
                    report.failures.push(error);
                    return;
                }
            },
        };

        if let Err(e) = process.start_continuous() {
            // One direction may already be open.
            halt(process.as_ref());
            let error = PeerError::sync_process(&pair.workspace, &pair.peer, e.to_string());
            self.publish_failure(&pair, &error);
            report.failures.push(error);
            return;
        }

        let adopted = {
            let mut table = self.table.lock();
            match table.get_mut(&pair) {
                Some(owned)
                    if !self.disposed.load(Ordering::Acquire)
                        && Arc::ptr_eq(&owned.process, &process) =>
                {
                    owned.state = ProcessState::Streaming;
                    true
                }
                _ => false,
            }
        };
        if !adopted {
            // Disposed while starting; the table no longer owns it.
            stop(&pair, process.as_ref());
            return;
        }

        metrics::record_sync_process_started(&pair.workspace, &pair.peer);
        info!(workspace = %pair.workspace, peer = %pair.peer, "Sync process streaming");
        report.started.push(pair);
    }

    fn ensure_idle(&self, pair: SyncPair, report: &mut ReconcileReport) {
        let process = {
            let table = self.table.lock();
            match table.get(&pair) {
                Some(owned) if owned.state == ProcessState::Streaming => Some(Arc::clone(&owned.process)),
                _ => None,
            }
        };
        let Some(process) = process else {
            return;
        };

        stop(&pair, process.as_ref());
        if let Some(owned) = self.table.lock().get_mut(&pair) {
            owned.state = ProcessState::Idle;
        }
        report.stopped.push(pair);
    }

    fn publish_failure(&self, pair: &SyncPair, error: &PeerError) {
        warn!(workspace = %pair.workspace, peer = %pair.peer, error = %error, "Sync process failed");
        metrics::record_sync_failure(&pair.workspace, &pair.peer);
        // No receivers is fine.
        let _ = self.failures_tx.send(error.clone());
    }

    fn streaming_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|owned| owned.state == ProcessState::Streaming)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::transport::{BoxFuture, SyncError, SyncResult, SyncStats};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    const WS_A: &str = "+testa.a123";
    const WS_B: &str = "+testb.b234";
    const PUB_A: &str = "https://a.pub";
    const PUB_B: &str = "https://b.pub";

    /// Transport that records process lifecycles and can refuse to start.
    #[derive(Default)]
    struct FlagTransport {
        opened: AtomicUsize,
        processes: Mutex<Vec<(SyncPair, Arc<Flags>)>>,
        failing: Mutex<HashSet<SyncPair>>,
    }

    #[derive(Default)]
    struct Flags {
        push: AtomicBool,
        pull: AtomicBool,
        starts: AtomicUsize,
        fail: AtomicBool,
    }

    struct FlagProcess(Arc<Flags>);

    impl SyncProcess for FlagProcess {
        fn start_continuous(&self) -> SyncResult<()> {
            if self.0.fail.load(Ordering::SeqCst) {
                return Err(SyncError("connection refused".to_string()));
            }
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            self.0.push.store(true, Ordering::SeqCst);
            self.0.pull.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_push(&self) {
            self.0.push.store(false, Ordering::SeqCst);
        }

        fn stop_pull(&self) {
            self.0.pull.store(false, Ordering::SeqCst);
        }
    }

    impl SyncTransport for FlagTransport {
        fn open(&self, storage: SharedStorage, peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let pair = SyncPair::new(storage.workspace(), peer);
            let flags = Arc::new(Flags::default());
            flags.fail.store(self.failing.lock().contains(&pair), Ordering::SeqCst);
            self.processes.lock().push((pair, Arc::clone(&flags)));
            Ok(Box::new(FlagProcess(flags)))
        }

        fn sync_once(&self, _storage: SharedStorage, _peer: &str) -> BoxFuture<'_, SyncStats> {
            Box::pin(async { Ok(SyncStats::default()) })
        }
    }

    impl FlagTransport {
        /// Processes of `pair` with at least one direction running.
        fn streaming(&self, pair: &SyncPair) -> usize {
            self.processes
                .lock()
                .iter()
                .filter(|(p, flags)| {
                    p == pair && (flags.push.load(Ordering::SeqCst) || flags.pull.load(Ordering::SeqCst))
                })
                .count()
        }

        fn total_streaming(&self) -> usize {
            self.processes
                .lock()
                .iter()
                .filter(|(_, flags)| flags.push.load(Ordering::SeqCst) || flags.pull.load(Ordering::SeqCst))
                .count()
        }

        fn fail(&self, pair: SyncPair, failing: bool) {
            for (p, flags) in self.processes.lock().iter() {
                if *p == pair {
                    flags.fail.store(failing, Ordering::SeqCst);
                }
            }
            if failing {
                self.failing.lock().insert(pair);
            } else {
                self.failing.lock().remove(&pair);
            }
        }
    }

    struct Fixture {
        stores: Arc<StoreRegistry>,
        peers: Arc<PeerRegistry>,
        liveness: Arc<LivenessFlag>,
        transport: Arc<FlagTransport>,
        coordinator: LiveSyncCoordinator,
    }

    fn fixture(live: bool) -> Fixture {
        let stores = Arc::new(StoreRegistry::with_storages([
            Arc::new(MemoryStorage::new(WS_A)) as SharedStorage,
            Arc::new(MemoryStorage::new(WS_B)) as SharedStorage,
        ]));
        let peers = Arc::new(PeerRegistry::with_peers([
            (WS_A.to_string(), vec![PUB_A]),
            (WS_B.to_string(), vec![PUB_A, PUB_B]),
        ]));
        let liveness = Arc::new(LivenessFlag::new(live));
        let transport = Arc::new(FlagTransport::default());
        let coordinator = LiveSyncCoordinator::new(
            Arc::clone(&stores),
            Arc::clone(&peers),
            Arc::clone(&liveness),
            Arc::clone(&transport) as Arc<dyn SyncTransport>,
            &CoordinatorSettings::default(),
        );
        Fixture {
            stores,
            peers,
            liveness,
            transport,
            coordinator,
        }
    }

    #[test]
    fn test_not_live_creates_nothing() {
        let f = fixture(false);
        assert!(f.coordinator.owned_pairs().is_empty());
        assert_eq!(f.transport.opened.load(Ordering::SeqCst), 0);
        assert_eq!(f.coordinator.state(), CoordinatorState::Active);
    }

    #[test]
    fn test_live_streams_every_pair_once() {
        let f = fixture(true);
        assert_eq!(f.coordinator.streaming_pairs().len(), 3);
        for pair in f.coordinator.desired_pairs() {
            assert_eq!(f.transport.streaming(&pair), 1);
            assert_eq!(f.coordinator.process_state(&pair), Some(ProcessState::Streaming));
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let f = fixture(true);
        let report = f.coordinator.refresh();
        assert!(report.is_noop());
        assert_eq!(f.transport.opened.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_going_offline_stops_but_keeps_processes() {
        let f = fixture(true);
        f.liveness.set_live(false);

        assert!(f.coordinator.streaming_pairs().is_empty());
        assert_eq!(f.coordinator.owned_pairs().len(), 3);
        assert_eq!(f.transport.total_streaming(), 0);

        f.liveness.set_live(true);
        assert_eq!(f.coordinator.streaming_pairs().len(), 3);
        // Restarted, not recreated
        assert_eq!(f.transport.opened.load(Ordering::SeqCst), 3);
        assert_eq!(f.transport.total_streaming(), 3);
    }

    #[test]
    fn test_removing_peer_disposes_only_that_pair() {
        let f = fixture(true);
        let removed = SyncPair::new(WS_B, PUB_B);
        f.peers.remove(WS_B, PUB_B);

        assert_eq!(f.coordinator.process_state(&removed), None);
        assert_eq!(f.transport.streaming(&removed), 0);
        assert_eq!(f.transport.streaming(&SyncPair::new(WS_A, PUB_A)), 1);
        assert_eq!(f.transport.streaming(&SyncPair::new(WS_B, PUB_A)), 1);
    }

    #[test]
    fn test_removing_workspace_disposes_its_pairs() {
        let f = fixture(true);
        f.stores.remove(WS_B);
        assert_eq!(f.coordinator.owned_pairs(), vec![SyncPair::new(WS_A, PUB_A)]);
        assert_eq!(f.transport.total_streaming(), 1);
    }

    #[test]
    fn test_start_failure_is_isolated_and_retried() {
        let stores = Arc::new(StoreRegistry::with_storages([
            Arc::new(MemoryStorage::new(WS_A)) as SharedStorage,
        ]));
        let peers = Arc::new(PeerRegistry::with_peers([(WS_A.to_string(), vec![PUB_A, PUB_B])]));
        let liveness = Arc::new(LivenessFlag::new(false));
        let transport = Arc::new(FlagTransport::default());
        let broken = SyncPair::new(WS_A, PUB_B);
        transport.fail(broken.clone(), true);

        let coordinator = LiveSyncCoordinator::new(
            stores,
            peers,
            Arc::clone(&liveness),
            Arc::clone(&transport) as Arc<dyn SyncTransport>,
            &CoordinatorSettings::default(),
        );
        let mut failures = coordinator.failures();

        liveness.set_live(true);
        assert!(liveness.is_live());
        assert_eq!(coordinator.streaming_pairs(), vec![SyncPair::new(WS_A, PUB_A)]);
        assert_eq!(coordinator.process_state(&broken), Some(ProcessState::Idle));

        let failure = failures.try_recv().unwrap();
        assert!(failure.is_retryable());
        assert!(matches!(failure, PeerError::SyncProcess { ref peer, .. } if peer == PUB_B));

        transport.fail(broken.clone(), false);
        let report = coordinator.refresh();
        assert_eq!(report.started, vec![broken.clone()]);
        assert_eq!(transport.streaming(&broken), 1);
    }

    #[test]
    fn test_report_interrupted_rests_idle() {
        let f = fixture(true);
        let pair = SyncPair::new(WS_A, PUB_A);
        let mut failures = f.coordinator.failures();

        assert!(f.coordinator.report_interrupted(WS_A, PUB_A, "stream closed"));
        assert!(!f.coordinator.report_interrupted(WS_A, PUB_A, "again"));
        assert_eq!(f.coordinator.process_state(&pair), Some(ProcessState::Idle));
        assert_eq!(f.transport.streaming(&pair), 0);
        assert!(failures.try_recv().is_ok());

        // Others untouched
        assert_eq!(f.coordinator.streaming_pairs().len(), 2);

        f.coordinator.refresh();
        assert_eq!(f.transport.streaming(&pair), 1);
    }

    #[test]
    fn test_explicit_reconcile() {
        let f = fixture(false);
        let pair = SyncPair::new(WS_A, PUB_B);

        let report = f.coordinator.reconcile([pair.clone()], true);
        assert_eq!(report.started, vec![pair.clone()]);
        assert_eq!(f.coordinator.owned_pairs(), vec![pair.clone()]);

        let report = f.coordinator.reconcile([pair.clone()], false);
        assert_eq!(report.stopped, vec![pair.clone()]);

        let report = f.coordinator.reconcile(Vec::new(), false);
        assert_eq!(report.disposed, vec![pair]);
        assert!(f.coordinator.owned_pairs().is_empty());
    }

    #[test]
    fn test_reconcile_skips_unregistered_workspace() {
        let f = fixture(false);
        let report = f.coordinator.reconcile([SyncPair::new("+ghost.x", PUB_A)], true);
        assert!(report.is_noop());
        assert!(f.coordinator.owned_pairs().is_empty());
    }

    #[test]
    fn test_replaced_store_gets_fresh_process() {
        let f = fixture(true);
        let pair = SyncPair::new(WS_A, PUB_A);

        f.stores.remove(WS_A);
        f.stores.add(WS_A, Arc::new(MemoryStorage::new(WS_A)));

        assert_eq!(f.transport.streaming(&pair), 1);
        assert_eq!(f.coordinator.process_state(&pair), Some(ProcessState::Streaming));
    }

    #[test]
    fn test_dispose_stops_everything() {
        let f = fixture(true);
        let mut state_rx = f.coordinator.state_receiver();
        f.coordinator.dispose();

        assert!(f.coordinator.is_disposed());
        assert_eq!(*state_rx.borrow_and_update(), CoordinatorState::Disposed);
        assert_eq!(f.transport.total_streaming(), 0);
        assert!(f.coordinator.owned_pairs().is_empty());

        // Terminal: nothing reacts any more.
        f.liveness.set_live(false);
        f.liveness.set_live(true);
        f.peers.add(WS_A, PUB_B);
        assert!(f.coordinator.refresh().is_noop());
        assert_eq!(f.transport.total_streaming(), 0);
        f.coordinator.dispose();
    }

    #[test]
    fn test_drop_disposes() {
        let f = fixture(true);
        let transport = Arc::clone(&f.transport);
        drop(f);
        assert_eq!(transport.total_streaming(), 0);
    }

    /// Opens push, then fails to open pull.
    #[derive(Default)]
    struct HalfStartTransport {
        flag_sets: Mutex<Vec<Arc<Flags>>>,
    }

    struct HalfStartProcess(Arc<Flags>);

    impl SyncProcess for HalfStartProcess {
        fn start_continuous(&self) -> SyncResult<()> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            self.0.push.store(true, Ordering::SeqCst);
            Err(SyncError("pull refused".to_string()))
        }

        fn stop_push(&self) {
            self.0.push.store(false, Ordering::SeqCst);
        }

        fn stop_pull(&self) {
            self.0.pull.store(false, Ordering::SeqCst);
        }
    }

    impl SyncTransport for HalfStartTransport {
        fn open(&self, _storage: SharedStorage, _peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
            let flags = Arc::new(Flags::default());
            self.flag_sets.lock().push(Arc::clone(&flags));
            Ok(Box::new(HalfStartProcess(flags)))
        }

        fn sync_once(&self, _storage: SharedStorage, _peer: &str) -> BoxFuture<'_, SyncStats> {
            Box::pin(async { Ok(SyncStats::default()) })
        }
    }

    impl HalfStartTransport {
        fn open_pushes(&self) -> usize {
            self.flag_sets
                .lock()
                .iter()
                .filter(|flags| flags.push.load(Ordering::SeqCst))
                .count()
        }
    }

    fn half_start_coordinator(transport: &Arc<HalfStartTransport>) -> (Arc<LivenessFlag>, Arc<PeerRegistry>, LiveSyncCoordinator) {
        let stores = Arc::new(StoreRegistry::with_storages([
            Arc::new(MemoryStorage::new(WS_A)) as SharedStorage,
        ]));
        let peers = Arc::new(PeerRegistry::with_peers([(WS_A.to_string(), vec![PUB_A])]));
        let liveness = Arc::new(LivenessFlag::new(false));
        let coordinator = LiveSyncCoordinator::new(
            stores,
            Arc::clone(&peers),
            Arc::clone(&liveness),
            Arc::clone(transport) as Arc<dyn SyncTransport>,
            &CoordinatorSettings::default(),
        );
        (liveness, peers, coordinator)
    }

    #[test]
    fn test_failed_start_stops_the_half_that_opened() {
        let transport = Arc::new(HalfStartTransport::default());
        let (liveness, _peers, coordinator) = half_start_coordinator(&transport);

        liveness.set_live(true);
        let pair = SyncPair::new(WS_A, PUB_A);
        assert_eq!(coordinator.process_state(&pair), Some(ProcessState::Idle));
        assert_eq!(transport.open_pushes(), 0);

        // Retried on every reconcile, never left half open
        coordinator.refresh();
        assert_eq!(transport.flag_sets.lock()[0].starts.load(Ordering::SeqCst), 2);
        assert_eq!(transport.open_pushes(), 0);

        liveness.set_live(false);
        coordinator.dispose();
        assert_eq!(transport.open_pushes(), 0);
    }

    #[test]
    fn test_idle_processes_are_halted_on_retire_and_dispose() {
        let transport = Arc::new(HalfStartTransport::default());
        let (liveness, peers, coordinator) = half_start_coordinator(&transport);
        liveness.set_live(true);

        // A direction reopened behind the coordinator's back is still closed
        // when the idle pair is retired.
        transport.flag_sets.lock()[0].push.store(true, Ordering::SeqCst);
        peers.remove(WS_A, PUB_A);
        assert!(coordinator.owned_pairs().is_empty());
        assert_eq!(transport.open_pushes(), 0);

        peers.add(WS_A, PUB_A);
        transport.flag_sets.lock()[1].push.store(true, Ordering::SeqCst);
        coordinator.dispose();
        assert_eq!(transport.open_pushes(), 0);
    }

    /// A transport that edits the peer registry from inside `open`.
    struct ReentrantTransport {
        inner: FlagTransport,
        peers: Mutex<Option<Weak<PeerRegistry>>>,
    }

    impl SyncTransport for ReentrantTransport {
        fn open(&self, storage: SharedStorage, peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
            if peer == PUB_A {
                if let Some(peers) = self.peers.lock().as_ref().and_then(Weak::upgrade) {
                    peers.add(storage.workspace(), PUB_B);
                }
            }
            self.inner.open(storage, peer)
        }

        fn sync_once(&self, storage: SharedStorage, peer: &str) -> BoxFuture<'_, SyncStats> {
            self.inner.sync_once(storage, peer)
        }
    }

    #[test]
    fn test_reentrant_registry_change_is_coalesced() {
        let stores = Arc::new(StoreRegistry::with_storages([
            Arc::new(MemoryStorage::new(WS_A)) as SharedStorage,
        ]));
        let peers = Arc::new(PeerRegistry::with_peers([(WS_A.to_string(), vec![PUB_A])]));
        let transport = Arc::new(ReentrantTransport {
            inner: FlagTransport::default(),
            peers: Mutex::new(Some(Arc::downgrade(&peers))),
        });

        let coordinator = LiveSyncCoordinator::new(
            stores,
            Arc::clone(&peers),
            Arc::new(LivenessFlag::new(true)),
            Arc::clone(&transport) as Arc<dyn SyncTransport>,
            &CoordinatorSettings::default(),
        );

        assert_eq!(coordinator.streaming_pairs().len(), 2);
        assert_eq!(transport.inner.streaming(&SyncPair::new(WS_A, PUB_A)), 1);
        assert_eq!(transport.inner.streaming(&SyncPair::new(WS_A, PUB_B)), 1);
    }
}
