// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription filter engine.
//!
//! Multiplexes the write event buses of many stores into one filtered
//! callback per subscriber.
//!
//! # Architecture
//!
//! ```text
//!  StoreRegistry ──on_change──► Subscription::sync_attachments (diff)
//!                                   │ attach / detach
//!                                   ▼
//!  store A bus ─┐
//!  store B bus ─┼──► dispatch ──► criteria (paths, history) ──► on_event
//!  store C bus ─┘
//! ```
//!
//! # Delivery Rules
//!
//! An event reaches a subscriber iff its workspace is in `workspaces` (or
//! `workspaces` is `None`), its path is in `paths` (or `paths` is `None`),
//! and it is the latest revision or `include_history` is set. Events are
//! delivered synchronously in the order the store emits them.
//!
//! # Re-subscription
//!
//! Each registry change triggers a diff between the attached stores and the
//! registered ones: stores that stay keep their attachment (no dropped or
//! duplicated events), removed or replaced stores are detached, new ones are
//! attached. Dropping a [`Subscription`] (or calling
//! [`unsubscribe`](Subscription::unsubscribe)) detaches from every bus; no
//! callback runs after that returns.

use crate::bus::Unsubscribe;
use crate::metrics;
use crate::storage::{SharedStorage, WorkspaceId, WriteEvent};
use crate::store::StoreRegistry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    /// `None` observes every current and future store.
    pub workspaces: Option<BTreeSet<WorkspaceId>>,
    /// `None` observes every path; otherwise exact matches only.
    pub paths: Option<BTreeSet<String>>,
    /// Deliver events for superseded revisions too.
    pub include_history: bool,
}

impl SubscriptionCriteria {
    /// Everything, latest revisions only.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_workspaces<I, S>(mut self, workspaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkspaceId>,
    {
        self.workspaces = Some(workspaces.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }

    /// Whether stores of `workspace` should be attached.
    pub fn watches_workspace(&self, workspace: &str) -> bool {
        self.workspaces
            .as_ref()
            .map_or(true, |set| set.contains(workspace))
    }

    /// Path and history filter, applied to events from attached stores.
    pub fn admits(&self, event: &WriteEvent) -> bool {
        if !event.is_latest && !self.include_history {
            return false;
        }
        self.paths
            .as_ref()
            .map_or(true, |set| set.contains(&event.document.path))
    }

    /// Full delivery predicate.
    pub fn matches(&self, event: &WriteEvent) -> bool {
        self.watches_workspace(&event.document.workspace) && self.admits(event)
    }
}

/// Creates subscriptions over the stores of a [`StoreRegistry`].
#[derive(Debug, Clone)]
pub struct SubscriptionEngine {
    stores: Arc<StoreRegistry>,
    active: Arc<AtomicUsize>,
}

impl SubscriptionEngine {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self {
            stores,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The registry this engine listens to.
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    /// Number of subscriptions that have not been unsubscribed.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Observe writes matching `criteria`.
    ///
    /// The callback runs synchronously on the writer's call stack.
    pub fn subscribe(
        &self,
        criteria: SubscriptionCriteria,
        on_event: impl Fn(&WriteEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let inner = Arc::new(SubscriptionInner {
            criteria,
            on_event: Box::new(on_event),
            active: AtomicBool::new(true),
            attachments: Mutex::new(IndexMap::new()),
            engine_active: Arc::clone(&self.active),
        });
        self.active.fetch_add(1, Ordering::AcqRel);
        metrics::record_subscription_opened();

        // Listen before the first diff so no registration is missed.
        let weak_inner = Arc::downgrade(&inner);
        let weak_stores = Arc::downgrade(&self.stores);
        let registry_guard = self.stores.on_change(move |change| {
            let (Some(inner), Some(stores)) = (weak_inner.upgrade(), weak_stores.upgrade()) else {
                return;
            };
            if inner.criteria.watches_workspace(change.workspace()) {
                inner.sync_attachments(&stores);
            }
        });

        inner.sync_attachments(&self.stores);
        debug!(
            workspaces = ?inner.criteria.workspaces,
            paths = ?inner.criteria.paths,
            include_history = inner.criteria.include_history,
            attached = inner.attachments.lock().len(),
            "Subscription opened"
        );

        Subscription {
            inner,
            registry_guard: Mutex::new(Some(registry_guard)),
        }
    }
}

struct Attachment {
    storage: SharedStorage,
    _detach: Unsubscribe,
}

struct SubscriptionInner {
    criteria: SubscriptionCriteria,
    on_event: Box<dyn Fn(&WriteEvent) + Send + Sync>,
    active: AtomicBool,
    attachments: Mutex<IndexMap<WorkspaceId, Attachment>>,
    engine_active: Arc<AtomicUsize>,
}

impl SubscriptionInner {
    fn dispatch(&self, event: &WriteEvent) {
        if !self.active.load(Ordering::Acquire) || !self.criteria.admits(event) {
            return;
        }
        trace!(
            workspace = %event.document.workspace,
            path = %event.document.path,
            is_latest = event.is_latest,
            "Delivering write event"
        );
        metrics::record_event_delivered(&event.document.workspace);
        (self.on_event)(event);
    }

    /// Diff attached stores against the registry and fix up the difference.
    fn sync_attachments(self: &Arc<Self>, stores: &StoreRegistry) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        let desired: Vec<(WorkspaceId, SharedStorage)> = stores
            .entries()
            .into_iter()
            .filter(|(ws, _)| self.criteria.watches_workspace(ws))
            .collect();

        let (stale, to_attach) = {
            let mut attachments = self.attachments.lock();
            let stale_keys: Vec<WorkspaceId> = attachments
                .iter()
                .filter(|(ws, attachment)| {
                    !desired
                        .iter()
                        .any(|(w, s)| w == *ws && Arc::ptr_eq(s, &attachment.storage))
                })
                .map(|(ws, _)| ws.clone())
                .collect();
            let stale: Vec<Attachment> = stale_keys
                .iter()
                .filter_map(|ws| attachments.shift_remove(ws))
                .collect();
            let to_attach: Vec<(WorkspaceId, SharedStorage)> = desired
                .into_iter()
                .filter(|(ws, _)| !attachments.contains_key(ws))
                .collect();
            (stale, to_attach)
        };

        if !stale.is_empty() {
            debug!(detached = stale.len(), "Subscription detached from removed stores");
        }
        // Detach outside the lock.
        drop(stale);

        for (workspace, storage) in to_attach {
            let weak: Weak<Self> = Arc::downgrade(self);
            let detach = storage.on_write(Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(event);
                }
            }));

            let mut attachments = self.attachments.lock();
            if !self.active.load(Ordering::Acquire) || attachments.contains_key(&workspace) {
                // Closed or attached re-entrantly meanwhile; `detach` drops after the guard.
                drop(attachments);
                drop(detach);
                continue;
            }
            trace!(workspace = %workspace, "Subscription attached");
            attachments.insert(
                workspace,
                Attachment {
                    storage,
                    _detach: detach,
                },
            );
        }
    }

    fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let detached: Vec<_> = self.attachments.lock().drain(..).collect();
        let count = detached.len();
        drop(detached);

        self.engine_active.fetch_sub(1, Ordering::AcqRel);
        metrics::record_subscription_closed();
        debug!(detached = count, "Subscription closed");
    }
}

/// A live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
    registry_guard: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    /// Detach from every store and stop following the registry.
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn criteria(&self) -> &SubscriptionCriteria {
        &self.inner.criteria
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Workspaces whose buses this subscription is attached to.
    pub fn attached_workspaces(&self) -> Vec<WorkspaceId> {
        self.inner.attachments.lock().keys().cloned().collect()
    }

    fn close(&self) {
        // Stop following the registry first so no re-attach can race the close.
        let guard = self.registry_guard.lock().take();
        drop(guard);
        self.inner.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("criteria", &self.inner.criteria)
            .field("active", &self.is_active())
            .field("attached", &self.attached_workspaces())
            .finish()
    }
}
