//! # Reactive Peer
//!
//! The reactive core of a local-first peer: it keeps track of which document
//! stores and which sync peers exist, delivers write events to filtered
//! subscribers, maintains query projections, and keeps exactly one live sync
//! process running per (workspace, peer) pair while the peer is live.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              PeerHost                                    │
//! │                                                                          │
//! │  ┌───────────────┐   ┌──────────────┐   ┌─────────────┐  ┌─────────────┐ │
//! │  │ StoreRegistry │   │ PeerRegistry │   │ LivenessFlag│  │CurrentAuthor│ │
//! │  └───────┬───────┘   └──────┬───────┘   └──────┬──────┘  └──────┬──────┘ │
//! │          │ on_change        │                  │                │        │
//! │    ┌─────┴──────────────┐   └────────┬─────────┘                │        │
//! │    ▼                    ▼            ▼                          │        │
//! │  ┌────────────────────┐  ┌──────────────────────┐               │        │
//! │  │ SubscriptionEngine │  │ LiveSyncCoordinator  │               │        │
//! │  │ (filter + re-diff) │  │ (ownership table,    │               │        │
//! │  └─────────┬──────────┘  │  reconcile)          │               │        │
//! │            ▼             └──────────┬───────────┘               │        │
//! │  ┌────────────────────┐             ▼                           ▼        │
//! │  │ Paths / Document   │       SyncTransport              writes via     │
//! │  │ projections        │       (push + pull)              Document::set  │
//! │  └────────────────────┘                                                  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything reacts synchronously: when a registry mutation or
//! `set_live` returns, subscriptions are re-attached, projections are
//! recomputed and sync processes are started or stopped. Async hosts can
//! observe the same state through `tokio::sync::watch` receivers.
//!
//! Storage engines and the wire protocol are external: implement
//! [`StorageHandle`](storage::StorageHandle) and
//! [`SyncTransport`](transport::SyncTransport), or use
//! [`MemoryStorage`](memory::MemoryStorage) and
//! [`NoOpTransport`](transport::NoOpTransport).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reactive_peer::{PeerHost, PeerHostConfig, SubscriptionCriteria};
//!
//! let mut config = PeerHostConfig::default();
//! config.workspaces.push("+gardening.bxxxx".into());
//! config.peers.insert("+gardening.bxxxx".into(), vec!["https://pub.example".into()]);
//!
//! let host = PeerHost::new(config).expect("valid config");
//! let _sub = host.subscribe(SubscriptionCriteria::all(), |event| {
//!     println!("{} changed", event.document.path);
//! });
//!
//! host.set_live(true); // one streaming process for (+gardening.bxxxx, https://pub.example)
//! host.dispose();
//! ```

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod identity;
pub mod liveness;
pub mod memory;
pub mod metrics;
pub mod peer;
pub mod projection;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod transport;

// Re-exports for convenience
pub use bus::{Unsubscribe, WriteEventBus};
pub use config::{CoordinatorSettings, PeerHostConfig, PeerSettings};
pub use coordinator::{CoordinatorState, LiveSyncCoordinator, ProcessState, ReconcileReport, SyncPair};
pub use error::{PeerError, Result};
pub use host::{PeerHost, PeerHostBuilder, PeerSyncOutcome};
pub use identity::{AuthorKeypair, CurrentAuthor};
pub use liveness::LivenessFlag;
pub use memory::{MemoryStorage, MemoryStorageFactory};
pub use peer::{PeerChange, PeerRegistry};
pub use projection::{DocumentProjection, PathsProjection};
pub use storage::{Document, DocToSet, QueryOpts, SharedStorage, StorageFactory, StorageHandle, WriteEvent, WriteResult};
pub use store::{StoreChange, StoreRegistry};
pub use subscription::{Subscription, SubscriptionCriteria, SubscriptionEngine};
pub use transport::{NoOpTransport, SyncError, SyncProcess, SyncStats, SyncTransport};
