// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronous listener lists and the write event bus.
//!
//! Every reactive edge in the crate (registry changes, liveness toggles,
//! committed writes) is a [`Listeners`] list. Emission is synchronous and in
//! registration order, so dependents observe a mutation before the mutating
//! call returns.
//!
//! # Cancellation
//!
//! Removing a listener takes effect immediately, even in the middle of an
//! emission that already snapshotted the list: each entry carries an `alive`
//! flag that is checked right before its callback runs. No lock is held while
//! a callback runs, so callbacks may subscribe, unsubscribe or mutate the
//! registries that emitted them.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::storage::WriteEvent;

/// A unique identifier for a registered listener.
pub type ListenerId = u64;

struct Entry<E> {
    alive: AtomicBool,
    callback: Box<dyn Fn(&E) + Send + Sync>,
}

/// Ordered, thread-safe list of callbacks for events of type `E`.
pub struct Listeners<E> {
    entries: RwLock<IndexMap<ListenerId, Arc<Entry<E>>>>,
    next_id: AtomicU64,
}

impl<E: 'static> Listeners<E> {
    /// Create an empty listener list.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback and return its id.
    pub fn add(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            alive: AtomicBool::new(true),
            callback: Box::new(callback),
        });
        self.entries.write().insert(id, entry);
        id
    }

    /// Remove a callback. Returns `true` if it was registered.
    ///
    /// The callback will not run again after this returns, including for an
    /// emission currently in progress.
    pub fn remove(&self, id: ListenerId) -> bool {
        match self.entries.write().shift_remove(&id) {
            Some(entry) => {
                entry.alive.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Register a callback and return a handle that removes it when dropped.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(&E) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.add(callback);
        let weak: Weak<Self> = Arc::downgrade(self);
        Unsubscribe::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.remove(id);
            }
        })
    }

    /// Deliver an event to every live callback, in registration order.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Arc<Entry<E>>> = self.entries.read().values().cloned().collect();
        for entry in snapshot {
            if entry.alive.load(Ordering::Acquire) {
                (entry.callback)(event);
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every callback.
    pub fn clear(&self) {
        let drained: Vec<_> = self.entries.write().drain(..).collect();
        for (_, entry) in drained {
            entry.alive.store(false, Ordering::Release);
        }
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.read().len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// Detach handle returned by every `subscribe`/`on_change` in the crate.
///
/// Detaches when [`unsubscribe`](Self::unsubscribe) is called or when the
/// handle is dropped, whichever happens first.
#[must_use = "dropping an Unsubscribe detaches the listener immediately"]
pub struct Unsubscribe {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    /// Wrap a detach action.
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A handle with nothing to detach.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    /// Detach now.
    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Per-storage write notification bus.
///
/// Storage implementations own one and call [`emit`](Self::emit) once per
/// committed write (and once per superseded revision during history
/// replication), in commit order.
#[derive(Debug, Clone, Default)]
pub struct WriteEventBus {
    listeners: Arc<Listeners<WriteEvent>>,
}

impl WriteEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a callback; the returned handle detaches it.
    pub fn subscribe(&self, callback: impl Fn(&WriteEvent) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(callback)
    }

    /// Deliver a committed write to all attached callbacks.
    pub fn emit(&self, event: &WriteEvent) {
        self.listeners.emit(event);
    }

    /// Number of attached callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}
