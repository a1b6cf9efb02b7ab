//! Coordinator state types.
//!
//! Defines the per-pair sync lifecycle and the coordinator's own lifecycle.
//!
//! # Pair Transitions
//!
//! ```text
//!                 reconcile (live, pair desired)
//!        ┌─────────────────────────────────────────┐
//!        │                                         ↓
//!      Idle ←─────────────────────────────── Streaming
//!        ↑   live = false / stream interrupted /   │
//!        │   start failed                          │
//!        │                                         │ pair no longer desired,
//!        │                                         │ dispose()
//!        └─────────── (disposed: entry removed) ←──┘
//! ```
//!
//! # State Descriptions
//!
//! - **Idle**: A process exists (or will be created) but neither direction streams.
//! - **Streaming**: `start_continuous()` succeeded; push and pull run in the transport.
//!
//! The coordinator itself is `Active` from construction until `dispose()`,
//! then `Disposed` for good.

use crate::error::PeerError;
use crate::storage::{PeerEndpoint, WorkspaceId};

/// A (workspace, peer) pair: the unit of sync ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPair {
    pub workspace: WorkspaceId,
    pub peer: PeerEndpoint,
}

impl SyncPair {
    pub fn new(workspace: impl Into<WorkspaceId>, peer: impl Into<PeerEndpoint>) -> Self {
        Self {
            workspace: workspace.into(),
            peer: peer.into(),
        }
    }
}

impl std::fmt::Display for SyncPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.workspace, self.peer)
    }
}

/// State of one owned sync process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Not streaming.
    #[default]
    Idle,

    /// Streaming in both directions.
    Streaming,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Idle => write!(f, "Idle"),
            ProcessState::Streaming => write!(f, "Streaming"),
        }
    }
}

/// State of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Reacting to registry and liveness changes.
    Active,

    /// Torn down. Every process was stopped; reconcile is a no-op.
    Disposed,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Active => write!(f, "Active"),
            CoordinatorState::Disposed => write!(f, "Disposed"),
        }
    }
}

/// What one reconcile pass did.
///
/// A pair that was stopped and then dropped appears in both `stopped` and
/// `disposed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pairs that entered `Streaming`.
    pub started: Vec<SyncPair>,
    /// Pairs that left `Streaming`.
    pub stopped: Vec<SyncPair>,
    /// Pairs removed from the ownership table.
    pub disposed: Vec<SyncPair>,
    /// Pairs that failed to start; each rests in `Idle`.
    pub failures: Vec<PeerError>,
}

impl ReconcileReport {
    /// Nothing changed.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.disposed.is_empty()
            && self.failures.is_empty()
    }

    /// Fold a later pass into this one.
    pub(crate) fn merge(&mut self, other: ReconcileReport) {
        self.started.extend(other.started);
        self.stopped.extend(other.stopped);
        self.disposed.extend(other.disposed);
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_state_display() {
        assert_eq!(ProcessState::Idle.to_string(), "Idle");
        assert_eq!(ProcessState::Streaming.to_string(), "Streaming");
        assert_eq!(ProcessState::default(), ProcessState::Idle);
    }

    #[test]
    fn test_coordinator_state_display() {
        assert_eq!(CoordinatorState::Active.to_string(), "Active");
        assert_eq!(CoordinatorState::Disposed.to_string(), "Disposed");
    }

    #[test]
    fn test_sync_pair_display_and_order() {
        let a = SyncPair::new("+testa.a123", "https://a.pub");
        let b = SyncPair::new("+testa.a123", "https://b.pub");
        assert_eq!(a.to_string(), "+testa.a123 <-> https://a.pub");
        assert!(a < b);
    }

    #[test]
    fn test_report_merge_and_noop() {
        let mut report = ReconcileReport::default();
        assert!(report.is_noop());

        report.merge(ReconcileReport {
            started: vec![SyncPair::new("+testa.a123", "https://a.pub")],
            ..Default::default()
        });
        report.merge(ReconcileReport {
            failures: vec![PeerError::sync_process("+testa.a123", "https://b.pub", "refused")],
            ..Default::default()
        });

        assert!(!report.is_noop());
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.failures.len(), 1);
    }
}
