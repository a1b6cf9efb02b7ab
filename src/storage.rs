// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage integration traits and document types.
//!
//! Defines what the coordinator needs from a per-workspace document store.
//! Conflict resolution, signing and persistence belong to the store; this
//! crate only reads (point queries, path listings, write events) and forwards
//! explicit document writes.
//!
//! # Example
//!
//! ```rust,no_run
//! use reactive_peer::bus::{Unsubscribe, WriteEventBus};
//! use reactive_peer::identity::AuthorKeypair;
//! use reactive_peer::storage::{
//!     DocToSet, Document, QueryOpts, StorageHandle, ValidationError, WriteCallback, WriteResult,
//! };
//!
//! struct MyStore {
//!     workspace: String,
//!     bus: WriteEventBus,
//! }
//!
//! impl StorageHandle for MyStore {
//!     fn workspace(&self) -> &str {
//!         &self.workspace
//!     }
//!
//!     fn get_document(&self, _path: &str) -> Option<Document> {
//!         None
//!     }
//!
//!     fn list_paths(&self, _query: &QueryOpts) -> Vec<String> {
//!         Vec::new()
//!     }
//!
//!     fn write(&self, _author: &AuthorKeypair, _doc: DocToSet) -> Result<WriteResult, ValidationError> {
//!         Ok(WriteResult::Accepted)
//!     }
//!
//!     fn on_write(&self, callback: WriteCallback) -> Unsubscribe {
//!         self.bus.subscribe(move |event| callback(event))
//!     }
//! }
//! ```

use crate::bus::Unsubscribe;
use crate::identity::AuthorKeypair;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Workspace address, e.g. `+gardening.bxxxx`.
pub type WorkspaceId = String;

/// Peer endpoint URL, e.g. `https://pub.example.com`.
pub type PeerEndpoint = String;

/// Shared handle to a workspace's store.
pub type SharedStorage = Arc<dyn StorageHandle>;

/// Callback attached to a store's write event bus.
pub type WriteCallback = Box<dyn Fn(&WriteEvent) + Send + Sync>;

/// A signed document as held by the store.
///
/// Identified by (workspace, path, author) for history and by
/// (workspace, path) for the current revision. Empty content is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub format: String,
    pub workspace: WorkspaceId,
    pub path: String,
    pub author: String,
    pub content: String,
    pub content_hash: String,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub delete_after: Option<i64>,
    #[serde(default)]
    pub signature: String,
}

impl Document {
    /// Whether this revision deletes the path.
    pub fn is_tombstone(&self) -> bool {
        self.content.is_empty()
    }
}

/// The caller-controlled part of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocToSet {
    pub format: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub delete_after: Option<i64>,
}

/// Notification of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub document: Document,
    /// `true` when the write originated on this peer, `false` when it arrived via sync.
    pub is_local: bool,
    /// `false` when the revision is not the current head for its path.
    pub is_latest: bool,
}

/// Outcome of a write the store did not reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// Stored (as head or as history).
    Accepted,
    /// Older than or identical to what the store already has.
    Ignored,
}

/// The store refused a document (bad path, bad author, bad signature...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Path listing options.
///
/// Empty strings are treated the same as `None` for the three path bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOpts {
    /// Only paths starting with this prefix.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub low_path: Option<String>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub high_path: Option<String>,
    /// `Some(true)`: tombstones only. `Some(false)`: live documents only.
    #[serde(default)]
    pub content_is_empty: Option<bool>,
    #[serde(default)]
    pub include_history: bool,
}

impl QueryOpts {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Whether `document` satisfies the path bounds and the tombstone filter.
    pub fn admits(&self, document: &Document) -> bool {
        if !self.covers_path(&document.path) {
            return false;
        }
        match self.content_is_empty {
            Some(true) if !document.is_tombstone() => false,
            Some(false) if document.is_tombstone() => false,
            _ => true,
        }
    }

    /// Path bounds only.
    ///
    /// A write inside the bounds can move a path in or out of the result
    /// even when the document itself fails the tombstone filter.
    pub fn covers_path(&self, path: &str) -> bool {
        if let Some(prefix) = non_empty(&self.path_prefix) {
            if !path.starts_with(prefix) {
                return false;
            }
        }
        if let Some(low) = non_empty(&self.low_path) {
            if path < low {
                return false;
            }
        }
        if let Some(high) = non_empty(&self.high_path) {
            if path >= high {
                return false;
            }
        }
        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// What the coordinator needs from a workspace's store.
///
/// The host supplies implementations; the crate ships
/// [`MemoryStorage`](crate::memory::MemoryStorage) for ephemeral workspaces
/// and tests.
pub trait StorageHandle: Send + Sync + 'static {
    /// The workspace this store holds.
    fn workspace(&self) -> &str;

    /// Current revision at `path`, if any.
    fn get_document(&self, path: &str) -> Option<Document>;

    /// Paths matching `query`, in the store's order.
    fn list_paths(&self, query: &QueryOpts) -> Vec<String>;

    /// Sign and store a document as `author`.
    fn write(&self, author: &AuthorKeypair, doc: DocToSet) -> Result<WriteResult, ValidationError>;

    /// Attach to the store's write event bus.
    ///
    /// The callback runs once per committed write, in commit order, until the
    /// returned handle is dropped or unsubscribed.
    fn on_write(&self, callback: WriteCallback) -> Unsubscribe;
}

/// Builds stores for workspaces added by address.
pub trait StorageFactory: Send + Sync + 'static {
    fn create(&self, workspace: &str) -> Result<SharedStorage, ValidationError>;
}
