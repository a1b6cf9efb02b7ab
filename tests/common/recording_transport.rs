//! Recording SyncTransport for testing.
//!
//! Records every process it opens and the direction each one is streaming
//! in, so tests can assert lifecycle exclusivity (never two streaming
//! processes for one pair) and teardown completeness. Start failures and
//! one-shot sync failures are configurable per pair / per peer.

#![allow(dead_code)]

use parking_lot::Mutex;
use reactive_peer::coordinator::SyncPair;
use reactive_peer::storage::SharedStorage;
use reactive_peer::transport::{BoxFuture, SyncError, SyncProcess, SyncResult, SyncStats, SyncTransport};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One process handed out by [`RecordingTransport::open`].
#[derive(Debug)]
pub struct RecordedProcess {
    pub pair: SyncPair,
    push: AtomicBool,
    pull: AtomicBool,
    pub starts: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl RecordedProcess {
    pub fn is_streaming(&self) -> bool {
        self.push.load(Ordering::SeqCst) || self.pull.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    processes: Vec<Arc<RecordedProcess>>,
    failing_starts: HashSet<SyncPair>,
    failing_syncs: HashSet<String>,
    /// Highest simultaneous streaming count seen per pair
    high_water: HashMap<SyncPair, usize>,
}

/// Transport double that records every lifecycle call.
#[derive(Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<State>>,
    sync_calls: AtomicUsize,
}

struct Process {
    record: Arc<RecordedProcess>,
    state: Arc<Mutex<State>>,
}

impl SyncProcess for Process {
    fn start_continuous(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.failing_starts.contains(&self.record.pair) {
            return Err(SyncError(format!("refused: {}", self.record.pair)));
        }
        self.record.starts.fetch_add(1, Ordering::SeqCst);
        self.record.push.store(true, Ordering::SeqCst);
        self.record.pull.store(true, Ordering::SeqCst);

        let pair = self.record.pair.clone();
        let now = state
            .processes
            .iter()
            .filter(|p| p.pair == pair && p.is_streaming())
            .count();
        let high = state.high_water.entry(pair).or_insert(0);
        *high = (*high).max(now);
        Ok(())
    }

    fn stop_push(&self) {
        self.record.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.record.push.store(false, Ordering::SeqCst);
    }

    fn stop_pull(&self) {
        self.record.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.record.pull.store(false, Ordering::SeqCst);
    }
}

impl SyncTransport for RecordingTransport {
    fn open(&self, storage: SharedStorage, peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
        let record = Arc::new(RecordedProcess {
            pair: SyncPair::new(storage.workspace(), peer),
            push: AtomicBool::new(false),
            pull: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        });
        self.state.lock().processes.push(Arc::clone(&record));
        Ok(Box::new(Process {
            record,
            state: Arc::clone(&self.state),
        }))
    }

    fn sync_once(&self, _storage: SharedStorage, peer: &str) -> BoxFuture<'_, SyncStats> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let fails = self.state.lock().failing_syncs.contains(peer);
        let peer = peer.to_string();
        Box::pin(async move {
            if fails {
                Err(SyncError(format!("{peer} unreachable")))
            } else {
                Ok(SyncStats { pushed: 1, pulled: 1 })
            }
        })
    }
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `start_continuous` fail (or succeed again) for `pair`.
    pub fn fail_starts(&self, pair: SyncPair, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_starts.insert(pair);
        } else {
            state.failing_starts.remove(&pair);
        }
    }

    /// Make `sync_once` fail for `peer`.
    pub fn fail_syncs(&self, peer: &str) {
        self.state.lock().failing_syncs.insert(peer.to_string());
    }

    pub fn opened(&self) -> usize {
        self.state.lock().processes.len()
    }

    pub fn opened_for(&self, pair: &SyncPair) -> usize {
        self.state.lock().processes.iter().filter(|p| p.pair == *pair).count()
    }

    /// Processes of `pair` streaming right now.
    pub fn streaming(&self, pair: &SyncPair) -> usize {
        self.state
            .lock()
            .processes
            .iter()
            .filter(|p| p.pair == *pair && p.is_streaming())
            .count()
    }

    pub fn total_streaming(&self) -> usize {
        self.state.lock().processes.iter().filter(|p| p.is_streaming()).count()
    }

    /// Pairs with at least one streaming process.
    pub fn streaming_pairs(&self) -> HashSet<SyncPair> {
        self.state
            .lock()
            .processes
            .iter()
            .filter(|p| p.is_streaming())
            .map(|p| p.pair.clone())
            .collect()
    }

    /// Highest number of simultaneously streaming processes seen for any pair.
    pub fn max_concurrent_per_pair(&self) -> usize {
        self.state.lock().high_water.values().copied().max().unwrap_or(0)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }
}
