// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Workspace → storage registry.
//!
//! Holds at most one store per workspace, in insertion order. Adding an
//! existing workspace is a no-op (first writer wins) and removing an absent
//! one is a no-op. Every effective mutation is announced to
//! [`on_change`](StoreRegistry::on_change) listeners before the mutating call
//! returns; the subscription engine, projections and the sync coordinator all
//! hang off those notifications.

use crate::bus::{Listeners, Unsubscribe};
use crate::metrics;
use crate::storage::{SharedStorage, WorkspaceId};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// A membership change in the [`StoreRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Added(WorkspaceId),
    Removed(WorkspaceId),
}

impl StoreChange {
    pub fn workspace(&self) -> &str {
        match self {
            StoreChange::Added(ws) | StoreChange::Removed(ws) => ws,
        }
    }
}

/// Live mapping from workspace address to its store.
pub struct StoreRegistry {
    storages: RwLock<IndexMap<WorkspaceId, SharedStorage>>,
    listeners: Arc<Listeners<StoreChange>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(IndexMap::new()),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Build a registry from initial stores, keyed by each store's workspace.
    ///
    /// Later duplicates of a workspace are ignored.
    pub fn with_storages(storages: impl IntoIterator<Item = SharedStorage>) -> Self {
        let registry = Self::new();
        {
            let mut map = registry.storages.write();
            for storage in storages {
                map.entry(storage.workspace().to_string()).or_insert(storage);
            }
            metrics::set_registered_workspaces(map.len());
        }
        registry
    }

    /// Register `storage` under `workspace`.
    ///
    /// Returns `false` (and changes nothing) if the workspace is already
    /// registered.
    pub fn add(&self, workspace: impl Into<WorkspaceId>, storage: SharedStorage) -> bool {
        let workspace = workspace.into();
        {
            let mut map = self.storages.write();
            if map.contains_key(&workspace) {
                debug!(workspace = %workspace, "Workspace already registered");
                return false;
            }
            map.insert(workspace.clone(), storage);
            metrics::set_registered_workspaces(map.len());
        }

        info!(workspace = %workspace, "Workspace added");
        self.listeners.emit(&StoreChange::Added(workspace));
        true
    }

    /// Unregister a workspace, returning its store if it was present.
    pub fn remove(&self, workspace: &str) -> Option<SharedStorage> {
        let removed = {
            let mut map = self.storages.write();
            let removed = map.shift_remove(workspace);
            metrics::set_registered_workspaces(map.len());
            removed
        };

        if removed.is_some() {
            info!(workspace = %workspace, "Workspace removed");
            self.listeners.emit(&StoreChange::Removed(workspace.to_string()));
        }
        removed
    }

    pub fn get(&self, workspace: &str) -> Option<SharedStorage> {
        self.storages.read().get(workspace).cloned()
    }

    pub fn contains(&self, workspace: &str) -> bool {
        self.storages.read().contains_key(workspace)
    }

    /// Registered workspaces in insertion order.
    pub fn list(&self) -> Vec<WorkspaceId> {
        self.storages.read().keys().cloned().collect()
    }

    /// Registered (workspace, store) pairs in insertion order.
    pub fn entries(&self) -> Vec<(WorkspaceId, SharedStorage)> {
        self.storages
            .read()
            .iter()
            .map(|(ws, storage)| (ws.clone(), Arc::clone(storage)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.read().is_empty()
    }

    /// Synchronous membership listener.
    pub fn on_change(&self, listener: impl Fn(&StoreChange) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("workspaces", &self.list())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
