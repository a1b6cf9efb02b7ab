// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Author identity held by the host.
//!
//! Keypairs are generated and persisted elsewhere; the peer only needs to know
//! which one (if any) signs the writes issued through document projections.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// An author's address and signing secret.
///
/// Address format is `@name.key`. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorKeypair {
    pub address: String,
    pub secret: String,
}

impl AuthorKeypair {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: secret.into(),
        }
    }

    /// See [`author_short_name`].
    pub fn short_name(&self) -> &str {
        author_short_name(&self.address)
    }
}

impl std::fmt::Debug for AuthorKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorKeypair")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The four-character name of an author address: `@suzy.bxxx` → `suzy`.
///
/// Addresses without the leading `@` or the `.` separator are returned as
/// far as they go.
pub fn author_short_name(address: &str) -> &str {
    let rest = address.strip_prefix('@').unwrap_or(address);
    match rest.find('.') {
        Some(dot) => &rest[..dot],
        None => rest,
    }
}

/// Path of the document holding an author's display name.
pub fn display_name_path(address: &str) -> String {
    format!("/about/{address}/name")
}

/// The currently signed-in author, if any.
///
/// Backed by a watch channel so async hosts can await sign-in changes.
#[derive(Debug)]
pub struct CurrentAuthor {
    tx: watch::Sender<Option<AuthorKeypair>>,
}

impl CurrentAuthor {
    pub fn new(initial: Option<AuthorKeypair>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Snapshot of the current identity.
    pub fn get(&self) -> Option<AuthorKeypair> {
        self.tx.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Replace the current identity.
    pub fn set(&self, author: Option<AuthorKeypair>) {
        match &author {
            Some(keypair) => info!(author = %keypair.address, "Current author set"),
            None => info!("Current author cleared"),
        }
        self.tx.send_replace(author);
    }

    /// Clear the current identity.
    pub fn sign_out(&self) {
        self.set(None);
    }

    /// Receiver for identity changes.
    pub fn watch(&self) -> watch::Receiver<Option<AuthorKeypair>> {
        self.tx.subscribe()
    }
}

impl Default for CurrentAuthor {
    fn default() -> Self {
        Self::new(None)
    }
}
