// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ephemeral in-memory store.
//!
//! Used for workspaces added by address without a host-provided factory and
//! throughout the tests. Keeps one revision per (path, author); the head of a
//! path is the revision with the highest timestamp (ties broken by author
//! address). Nothing is persisted and nothing is signed: `signature` is a
//! placeholder, `content_hash` is the hex SHA-256 of the content.

use crate::bus::{Unsubscribe, WriteEventBus};
use crate::identity::AuthorKeypair;
use crate::storage::{
    DocToSet, Document, QueryOpts, SharedStorage, StorageFactory, StorageHandle, ValidationError,
    WorkspaceId, WriteCallback, WriteEvent, WriteResult,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
struct Inner {
    /// path -> author -> revision
    docs: BTreeMap<String, HashMap<String, Document>>,
    last_timestamp: i64,
}

/// In-memory implementation of [`StorageHandle`].
pub struct MemoryStorage {
    workspace: WorkspaceId,
    inner: Mutex<Inner>,
    bus: WriteEventBus,
}

impl MemoryStorage {
    pub fn new(workspace: impl Into<WorkspaceId>) -> Self {
        Self {
            workspace: workspace.into(),
            inner: Mutex::new(Inner::default()),
            bus: WriteEventBus::new(),
        }
    }

    /// Validate a workspace address (`+name.key`) and create a store for it.
    pub fn for_address(workspace: &str) -> Result<Self, ValidationError> {
        validate_workspace(workspace)?;
        Ok(Self::new(workspace))
    }

    /// Accept a revision that arrived from a peer.
    ///
    /// Emits a non-local write event: `is_latest` tells whether the revision
    /// became the head of its path.
    pub fn ingest(&self, document: Document) -> Result<WriteResult, ValidationError> {
        if document.workspace != self.workspace {
            return Err(ValidationError::new(format!(
                "document belongs to {}, not {}",
                document.workspace, self.workspace
            )));
        }
        validate_path(&document.path)?;
        self.commit(document, false)
    }

    /// Every stored revision at `path`, newest first.
    pub fn history(&self, path: &str) -> Vec<Document> {
        let inner = self.inner.lock();
        let mut revisions: Vec<Document> = inner
            .docs
            .get(path)
            .map(|by_author| by_author.values().cloned().collect())
            .unwrap_or_default();
        revisions.sort_by(|a, b| head_order(b, a));
        revisions
    }

    /// Number of callbacks attached to the write bus.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    fn commit(&self, document: Document, is_local: bool) -> Result<WriteResult, ValidationError> {
        let event = {
            let mut inner = self.inner.lock();
            inner.last_timestamp = inner.last_timestamp.max(document.timestamp);

            let by_author = inner.docs.entry(document.path.clone()).or_default();
            if let Some(existing) = by_author.get(&document.author) {
                if existing.timestamp >= document.timestamp {
                    return Ok(WriteResult::Ignored);
                }
            }
            by_author.insert(document.author.clone(), document.clone());

            let is_latest = by_author
                .values()
                .max_by(|a, b| head_order(a, b))
                .map(|head| head.author == document.author)
                .unwrap_or(false);

            WriteEvent {
                document,
                is_local,
                is_latest,
            }
        };

        // Emit without holding the lock so listeners can query the store.
        self.bus.emit(&event);
        Ok(WriteResult::Accepted)
    }

    fn next_timestamp(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        let inner = self.inner.lock();
        now.max(inner.last_timestamp + 1)
    }

    fn head(by_author: &HashMap<String, Document>) -> Option<&Document> {
        by_author.values().max_by(|a, b| head_order(a, b))
    }
}

impl StorageHandle for MemoryStorage {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn get_document(&self, path: &str) -> Option<Document> {
        let inner = self.inner.lock();
        inner.docs.get(path).and_then(Self::head).cloned()
    }

    fn list_paths(&self, query: &QueryOpts) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .docs
            .iter()
            .filter(|(_, by_author)| {
                if query.include_history {
                    by_author.values().any(|doc| query.admits(doc))
                } else {
                    Self::head(by_author).is_some_and(|doc| query.admits(doc))
                }
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn write(&self, author: &AuthorKeypair, doc: DocToSet) -> Result<WriteResult, ValidationError> {
        validate_path(&doc.path)?;
        if !author.address.starts_with('@') {
            return Err(ValidationError::new(format!(
                "author address must start with @: {}",
                author.address
            )));
        }

        let document = Document {
            format: doc.format,
            workspace: self.workspace.clone(),
            content_hash: content_hash(&doc.content),
            signature: format!("unsigned:{}", author.address),
            path: doc.path,
            author: author.address.clone(),
            content: doc.content,
            timestamp: self.next_timestamp(),
            delete_after: doc.delete_after,
        };
        self.commit(document, true)
    }

    fn on_write(&self, callback: WriteCallback) -> Unsubscribe {
        self.bus.subscribe(move |event| callback(event))
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("workspace", &self.workspace)
            .field("paths", &self.inner.lock().docs.len())
            .finish()
    }
}

/// Creates a [`MemoryStorage`] per validated workspace address.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn create(&self, workspace: &str) -> Result<SharedStorage, ValidationError> {
        Ok(Arc::new(MemoryStorage::for_address(workspace)?))
    }
}

/// Higher timestamp wins; ties go to the greater author address.
fn head_order(a: &Document, b: &Document) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.author.cmp(&b.author))
}

/// SHA-256 of the content as lowercase hex.
fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn validate_workspace(workspace: &str) -> Result<(), ValidationError> {
    let Some(rest) = workspace.strip_prefix('+') else {
        return Err(ValidationError::new(format!(
            "workspace address must start with +: {workspace}"
        )));
    };
    match rest.split_once('.') {
        Some((name, key)) if !name.is_empty() && !key.is_empty() && !rest.contains(char::is_whitespace) => Ok(()),
        _ => Err(ValidationError::new(format!(
            "workspace address must look like +name.key: {workspace}"
        ))),
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::new(format!("path must start with /: {path}")));
    }
    if path.contains(char::is_whitespace) {
        return Err(ValidationError::new(format!("path must not contain whitespace: {path}")));
    }
    Ok(())
}
