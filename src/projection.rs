// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Derived read models over a single workspace.
//!
//! A projection holds a value derived from storage and keeps it equal to
//! what a fresh query would return. Path listings recompute from the store
//! on every relevant event rather than patching incrementally, always
//! reading the store currently registered for the workspace.
//!
//! | Projection | Value | Recomputes on |
//! |------------|-------|---------------|
//! | [`PathsProjection`] | `Vec<String>` | write inside the query's path bounds, workspace added/removed |
//! | [`DocumentProjection`] | `Option<Document>` | write at the path (takes the event's document), workspace added/removed |
//!
//! Values are published through `tokio::sync::watch`, so async hosts can
//! `changed().await` while synchronous callers read the snapshot.
//!
//! A workspace that is not registered yields an empty value and a warning,
//! never an error.

use crate::bus::Unsubscribe;
use crate::error::{PeerError, Result};
use crate::identity::CurrentAuthor;
use crate::metrics;
use crate::storage::{DocToSet, Document, QueryOpts, WorkspaceId, WriteResult};
use crate::store::StoreRegistry;
use crate::subscription::{Subscription, SubscriptionCriteria, SubscriptionEngine};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Document format used when the host does not configure one.
pub const DEFAULT_DOCUMENT_FORMAT: &str = "es.4";

// ═══════════════════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════════════════

struct PathsState {
    workspace: WorkspaceId,
    query: QueryOpts,
    stores: Weak<StoreRegistry>,
    tx: watch::Sender<Vec<String>>,
}

impl PathsState {
    fn query_now(&self) -> Vec<String> {
        let storage = self.stores.upgrade().and_then(|stores| stores.get(&self.workspace));
        match storage {
            Some(storage) => storage.list_paths(&self.query),
            None => {
                warn!(workspace = %self.workspace, "Paths requested for unknown workspace");
                Vec::new()
            }
        }
    }

    fn recompute(&self) {
        let start = Instant::now();
        let paths = self.query_now();
        let changed = self.tx.send_if_modified(|current| {
            if *current == paths {
                return false;
            }
            *current = paths;
            true
        });
        metrics::record_projection_recompute("paths", start.elapsed());
        if changed {
            debug!(workspace = %self.workspace, "Paths projection updated");
        }
    }
}

/// The list of paths in a workspace matching a query.
pub struct PathsProjection {
    state: Arc<PathsState>,
    _subscription: Subscription,
    _registry_guard: Unsubscribe,
}

impl PathsProjection {
    pub fn new(engine: &SubscriptionEngine, workspace: impl Into<WorkspaceId>, query: QueryOpts) -> Self {
        let workspace = workspace.into();
        let stores = engine.stores();
        let (tx, _rx) = watch::channel(Vec::new());
        let state = Arc::new(PathsState {
            workspace: workspace.clone(),
            query,
            stores: Arc::downgrade(stores),
            tx,
        });

        let weak = Arc::downgrade(&state);
        let registry_guard = stores.on_change(move |change| {
            if let Some(state) = weak.upgrade() {
                if change.workspace() == state.workspace {
                    state.recompute();
                }
            }
        });

        let criteria = SubscriptionCriteria::all()
            .with_workspaces([workspace])
            .with_history(state.query.include_history);
        let weak = Arc::downgrade(&state);
        let subscription = engine.subscribe(criteria, move |event| {
            if let Some(state) = weak.upgrade() {
                // Bounds only, so a tombstone still drops a path the content filter now rejects.
                if state.query.covers_path(&event.document.path) {
                    state.recompute();
                }
            }
        });

        state.recompute();

        Self {
            state,
            _subscription: subscription,
            _registry_guard: registry_guard,
        }
    }

    pub fn workspace(&self) -> &str {
        &self.state.workspace
    }

    pub fn query(&self) -> &QueryOpts {
        &self.state.query
    }

    /// Current value.
    pub fn paths(&self) -> Vec<String> {
        self.state.tx.borrow().clone()
    }

    /// Receiver that wakes on every change of the value.
    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.state.tx.subscribe()
    }
}

impl std::fmt::Debug for PathsProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathsProjection")
            .field("workspace", &self.state.workspace)
            .field("query", &self.state.query)
            .field("paths", &self.paths())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Document
// ═══════════════════════════════════════════════════════════════════════════

struct DocumentState {
    workspace: WorkspaceId,
    path: String,
    stores: Weak<StoreRegistry>,
    tx: watch::Sender<Option<Document>>,
}

impl DocumentState {
    fn recompute(&self) {
        let start = Instant::now();
        let storage = self.stores.upgrade().and_then(|stores| stores.get(&self.workspace));
        let document = match storage {
            Some(storage) => storage.get_document(&self.path),
            None => {
                warn!(workspace = %self.workspace, path = %self.path, "Document requested for unknown workspace");
                None
            }
        };
        self.publish(document);
        metrics::record_projection_recompute("document", start.elapsed());
    }

    /// Latest-revision events carry the new head; take it as is.
    fn replace(&self, document: Document) {
        self.publish(Some(document));
    }

    fn publish(&self, document: Option<Document>) {
        self.tx.send_if_modified(|current| {
            if *current == document {
                return false;
            }
            *current = document;
            true
        });
    }
}

/// The current revision at one path, plus a setter.
pub struct DocumentProjection {
    state: Arc<DocumentState>,
    author: Arc<CurrentAuthor>,
    format: String,
    _subscription: Subscription,
    _registry_guard: Unsubscribe,
}

impl DocumentProjection {
    pub fn new(
        engine: &SubscriptionEngine,
        author: Arc<CurrentAuthor>,
        workspace: impl Into<WorkspaceId>,
        path: impl Into<String>,
    ) -> Self {
        let workspace = workspace.into();
        let path = path.into();
        let stores = engine.stores();
        let (tx, _rx) = watch::channel(None);
        let state = Arc::new(DocumentState {
            workspace: workspace.clone(),
            path: path.clone(),
            stores: Arc::downgrade(stores),
            tx,
        });

        let weak = Arc::downgrade(&state);
        let registry_guard = stores.on_change(move |change| {
            if let Some(state) = weak.upgrade() {
                if change.workspace() == state.workspace {
                    state.recompute();
                }
            }
        });

        let criteria = SubscriptionCriteria::all()
            .with_workspaces([workspace])
            .with_paths([path]);
        let weak = Arc::downgrade(&state);
        let subscription = engine.subscribe(criteria, move |event| {
            if let Some(state) = weak.upgrade() {
                state.replace(event.document.clone());
            }
        });

        state.recompute();

        Self {
            state,
            author,
            format: DEFAULT_DOCUMENT_FORMAT.to_string(),
            _subscription: subscription,
            _registry_guard: registry_guard,
        }
    }

    /// Use `format` for documents written through [`set`](Self::set).
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn workspace(&self) -> &str {
        &self.state.workspace
    }

    pub fn path(&self) -> &str {
        &self.state.path
    }

    /// Current revision, `None` if absent or the workspace is unknown.
    pub fn document(&self) -> Option<Document> {
        self.state.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Document>> {
        self.state.tx.subscribe()
    }

    /// Write `content` at this path as the current author.
    ///
    /// Fails with [`PeerError::Validation`] when nobody is signed in, the
    /// workspace is not registered, or the store rejects the document. On
    /// success the projection already reflects the write when this returns.
    pub fn set(&self, content: impl Into<String>, delete_after: Option<i64>) -> Result<WriteResult> {
        let workspace = &self.state.workspace;
        let Some(author) = self.author.get() else {
            metrics::record_document_write(workspace, "rejected");
            return Err(PeerError::Validation(
                "cannot write a document without a signed-in author".to_string(),
            ));
        };
        let Some(storage) = self.state.stores.upgrade().and_then(|stores| stores.get(workspace)) else {
            metrics::record_document_write(workspace, "rejected");
            return Err(PeerError::Validation(format!(
                "cannot write to unregistered workspace {workspace}"
            )));
        };

        let doc = DocToSet {
            format: self.format.clone(),
            path: self.state.path.clone(),
            content: content.into(),
            delete_after,
        };
        match storage.write(&author, doc) {
            Ok(result) => {
                let outcome = match result {
                    WriteResult::Accepted => "accepted",
                    WriteResult::Ignored => "ignored",
                };
                metrics::record_document_write(workspace, outcome);
                debug!(workspace = %workspace, path = %self.state.path, author = %author.address, outcome, "Document written");
                Ok(result)
            }
            Err(e) => {
                metrics::record_document_write(workspace, "rejected");
                warn!(workspace = %workspace, path = %self.state.path, error = %e, "Document write rejected");
                Err(e.into())
            }
        }
    }

    /// Write a tombstone (empty content) at this path.
    pub fn delete_doc(&self) -> Result<WriteResult> {
        self.set("", None)
    }
}

impl std::fmt::Debug for DocumentProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProjection")
            .field("workspace", &self.state.workspace)
            .field("path", &self.state.path)
            .field("format", &self.format)
            .finish()
    }
}
