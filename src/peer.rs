// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Workspace → peer endpoint registry.
//!
//! Each workspace owns an independent set of peer URLs. Sets are
//! de-duplicated on every write (first occurrence wins the position), so the
//! same endpoint never yields two sync processes for one workspace.
//!
//! # Change Notifications
//!
//! ```text
//! set / update / add / remove / replace_all
//!        │
//!        ▼ (only if the stored set differs)
//!   PeerChange { workspace }  ──►  on_change listeners (sync, in order)
//! ```
//!
//! # Example
//!
//! ```rust
//! use reactive_peer::peer::PeerRegistry;
//!
//! let peers = PeerRegistry::new();
//! peers.set("+gardening.abc", ["https://a.pub", "https://a.pub", "https://b.pub"]);
//! assert_eq!(peers.get("+gardening.abc"), vec!["https://a.pub", "https://b.pub"]);
//!
//! peers.update("+gardening.abc", |mut prev| {
//!     prev.push("https://c.pub".to_string());
//!     prev
//! });
//! assert_eq!(peers.get("+gardening.abc").len(), 3);
//! ```

use crate::bus::{Listeners, Unsubscribe};
use crate::storage::{PeerEndpoint, WorkspaceId};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// The peer set of one workspace changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChange {
    pub workspace: WorkspaceId,
}

/// Live mapping from workspace address to its peer endpoints.
pub struct PeerRegistry {
    peers: RwLock<IndexMap<WorkspaceId, IndexSet<PeerEndpoint>>>,
    listeners: Arc<Listeners<PeerChange>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(IndexMap::new()),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Build a registry from an initial map. Each list is de-duplicated.
    pub fn with_peers<I, P>(initial: I) -> Self
    where
        I: IntoIterator<Item = (WorkspaceId, P)>,
        P: IntoIterator,
        P::Item: Into<PeerEndpoint>,
    {
        let registry = Self::new();
        {
            let mut map = registry.peers.write();
            for (workspace, endpoints) in initial {
                let set = dedup(endpoints);
                if !set.is_empty() {
                    map.insert(workspace, set);
                }
            }
        }
        registry
    }

    /// Peers of `workspace` (empty if none).
    pub fn get(&self, workspace: &str) -> Vec<PeerEndpoint> {
        self.peers
            .read()
            .get(workspace)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every workspace's peers.
    pub fn all(&self) -> IndexMap<WorkspaceId, Vec<PeerEndpoint>> {
        self.peers
            .read()
            .iter()
            .map(|(ws, set)| (ws.clone(), set.iter().cloned().collect()))
            .collect()
    }

    /// Replace the peers of `workspace`.
    pub fn set<P>(&self, workspace: &str, endpoints: P) -> bool
    where
        P: IntoIterator,
        P::Item: Into<PeerEndpoint>,
    {
        let next = dedup(endpoints);
        self.store(workspace, |_| next)
    }

    /// Derive the next peer list of `workspace` from the previous one.
    ///
    /// `f` runs under the registry's write lock, so concurrent updates never
    /// lose each other's edits. It must not call back into the registry.
    pub fn update(&self, workspace: &str, f: impl FnOnce(Vec<PeerEndpoint>) -> Vec<PeerEndpoint>) -> bool {
        self.store(workspace, |current| {
            let previous = current.map(|set| set.iter().cloned().collect()).unwrap_or_default();
            dedup(f(previous))
        })
    }

    /// Add one endpoint to `workspace`.
    pub fn add(&self, workspace: &str, endpoint: impl Into<PeerEndpoint>) -> bool {
        let endpoint = endpoint.into();
        self.update(workspace, |mut prev| {
            prev.push(endpoint);
            prev
        })
    }

    /// Remove one endpoint from `workspace`.
    pub fn remove(&self, workspace: &str, endpoint: &str) -> bool {
        self.update(workspace, |prev| prev.into_iter().filter(|p| p != endpoint).collect())
    }

    /// Replace the whole map. Listeners hear about every workspace whose set
    /// differs between the old and new maps.
    pub fn replace_all<I, P>(&self, next: I)
    where
        I: IntoIterator<Item = (WorkspaceId, P)>,
        P: IntoIterator,
        P::Item: Into<PeerEndpoint>,
    {
        let mut next_map: IndexMap<WorkspaceId, IndexSet<PeerEndpoint>> = IndexMap::new();
        for (workspace, endpoints) in next {
            let set = dedup(endpoints);
            if !set.is_empty() {
                next_map.insert(workspace, set);
            }
        }

        let changed: Vec<WorkspaceId> = {
            let mut map = self.peers.write();
            let touched: BTreeSet<&WorkspaceId> = map.keys().chain(next_map.keys()).collect();
            let changed = touched
                .into_iter()
                .filter(|ws| !same_set(map.get(*ws), next_map.get(*ws)))
                .cloned()
                .collect();
            *map = next_map;
            changed
        };

        for workspace in changed {
            debug!(workspace = %workspace, "Peers replaced");
            self.listeners.emit(&PeerChange { workspace });
        }
    }

    /// Synchronous change listener.
    pub fn on_change(&self, listener: impl Fn(&PeerChange) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    /// Read-modify-write of one workspace's set under a single write lock.
    /// Listeners run after the lock is released.
    fn store(
        &self,
        workspace: &str,
        next: impl FnOnce(Option<&IndexSet<PeerEndpoint>>) -> IndexSet<PeerEndpoint>,
    ) -> bool {
        let count = {
            let mut map = self.peers.write();
            let next = next(map.get(workspace));
            if same_set(map.get(workspace), Some(&next)) {
                return false;
            }
            let count = next.len();
            if next.is_empty() {
                map.shift_remove(workspace);
            } else {
                map.insert(workspace.to_string(), next);
            }
            count
        };

        debug!(workspace = %workspace, peers = count, "Peers updated");
        self.listeners.emit(&PeerChange {
            workspace: workspace.to_string(),
        });
        true
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.all())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn dedup<P>(endpoints: P) -> IndexSet<PeerEndpoint>
where
    P: IntoIterator,
    P::Item: Into<PeerEndpoint>,
{
    endpoints.into_iter().map(Into::into).collect()
}

/// Set equality; order is not significant, absence equals empty.
fn same_set(a: Option<&IndexSet<PeerEndpoint>>, b: Option<&IndexSet<PeerEndpoint>>) -> bool {
    let empty = IndexSet::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    a.len() == b.len() && a.iter().all(|p| b.contains(p))
}
