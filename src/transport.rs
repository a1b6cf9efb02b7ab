// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync transport integration traits.
//!
//! The wire protocol lives outside this crate. The coordinator only needs to
//! open one [`SyncProcess`] per (storage, peer) pair and drive it between
//! continuous streaming and stopped; the host needs a one-shot sync.
//!
//! # Example
//!
//! ```rust,no_run
//! use reactive_peer::storage::SharedStorage;
//! use reactive_peer::transport::{BoxFuture, SyncProcess, SyncResult, SyncStats, SyncTransport};
//!
//! struct HttpProcess { /* push and pull stream handles */ }
//!
//! impl SyncProcess for HttpProcess {
//!     fn start_continuous(&self) -> SyncResult<()> {
//!         Ok(()) // spawn the push and pull streams
//!     }
//!     fn stop_push(&self) {}
//!     fn stop_pull(&self) {}
//! }
//!
//! struct HttpTransport;
//!
//! impl SyncTransport for HttpTransport {
//!     fn open(&self, _storage: SharedStorage, _peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
//!         Ok(Box::new(HttpProcess {}))
//!     }
//!
//!     fn sync_once(&self, _storage: SharedStorage, _peer: &str) -> BoxFuture<'_, SyncStats> {
//!         Box::pin(async move { Ok(SyncStats::default()) })
//!     }
//! }
//! ```

use crate::storage::SharedStorage;
use std::future::Future;
use std::pin::Pin;

/// Result type for transport operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = SyncResult<T>> + Send + 'a>>;

/// Simplified error for transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError(pub String);

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SyncError {}

/// Documents moved by a one-shot sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub pushed: usize,
    pub pulled: usize,
}

/// A bidirectional sync between one storage and one peer.
///
/// `start_continuous` does an initial sync and then keeps push and pull
/// streams open; the streams run inside the transport. Stopping is split by
/// direction, and the coordinator always stops both.
pub trait SyncProcess: Send + Sync {
    /// Begin streaming in both directions.
    fn start_continuous(&self) -> SyncResult<()>;

    /// Stop the local → peer stream. Idempotent.
    fn stop_push(&self);

    /// Stop the peer → local stream. Idempotent.
    fn stop_pull(&self);
}

/// Factory for sync processes, supplied by the host.
pub trait SyncTransport: Send + Sync + 'static {
    /// Construct (but do not start) a process for `storage` and `peer`.
    fn open(&self, storage: SharedStorage, peer: &str) -> SyncResult<Box<dyn SyncProcess>>;

    /// Sync once with `peer` and return when done.
    fn sync_once(&self, storage: SharedStorage, peer: &str) -> BoxFuture<'_, SyncStats>;
}

/// A transport that never touches the network.
///
/// Logs what it would do. Used when a peer runs without sync (tests,
/// offline hosts).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTransport;

struct NoOpProcess {
    workspace: String,
    peer: String,
}

impl SyncProcess for NoOpProcess {
    fn start_continuous(&self) -> SyncResult<()> {
        tracing::debug!(workspace = %self.workspace, peer = %self.peer, "NoOp: would start streaming");
        Ok(())
    }

    fn stop_push(&self) {
        tracing::trace!(workspace = %self.workspace, peer = %self.peer, "NoOp: would stop push");
    }

    fn stop_pull(&self) {
        tracing::trace!(workspace = %self.workspace, peer = %self.peer, "NoOp: would stop pull");
    }
}

impl SyncTransport for NoOpTransport {
    fn open(&self, storage: SharedStorage, peer: &str) -> SyncResult<Box<dyn SyncProcess>> {
        Ok(Box::new(NoOpProcess {
            workspace: storage.workspace().to_string(),
            peer: peer.to_string(),
        }))
    }

    fn sync_once(&self, storage: SharedStorage, peer: &str) -> BoxFuture<'_, SyncStats> {
        let peer = peer.to_string();
        Box::pin(async move {
            tracing::debug!(workspace = %storage.workspace(), peer = %peer, "NoOp: would sync once");
            Ok(SyncStats::default())
        })
    }
}
