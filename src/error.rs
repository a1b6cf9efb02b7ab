// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the peer coordinator.
//!
//! Errors are values the host renders, not conditions that tear the peer
//! down. Queries against a missing workspace degrade to empty results and
//! never surface here; writes and one-shot syncs do.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `NotFound` | No | Operation referenced an unregistered workspace (or one without peers) |
//! | `Validation` | No | Write without an author, or the store rejected the document |
//! | `SyncProcess` | Yes | One (workspace, peer) stream failed to start or was interrupted |
//! | `Config` | No | Configuration invalid |
//! | `Disposed` | No | The coordinator has been torn down |
//!
//! # Retry Behavior
//!
//! Use [`PeerError::is_retryable()`] to decide whether a later reconcile or
//! sync attempt may succeed. A `SyncProcess` failure is isolated to its pair:
//! the next reconcile while live restarts that pair.

use crate::storage::ValidationError;
use thiserror::Error;

/// Result type alias for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Errors surfaced by the registries, projections and the sync coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The operation referenced a workspace that is not registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write was attempted without an identity, or the store rejected it.
    ///
    /// Returned as a value so the host can render it next to the input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single pair's stream failed to start or was interrupted.
    ///
    /// Never escalated: the other pairs and the liveness flag are untouched.
    #[error("Sync process error ({workspace} <-> {peer}): {message}")]
    SyncProcess {
        workspace: String,
        peer: String,
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The coordinator was disposed; no further transitions happen.
    #[error("Coordinator disposed")]
    Disposed,
}

impl PeerError {
    /// Create a sync process error for a (workspace, peer) pair.
    pub fn sync_process(
        workspace: impl Into<String>,
        peer: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SyncProcess {
            workspace: workspace.into(),
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Error for a workspace that has no registered storage.
    pub fn workspace_not_found(workspace: &str) -> Self {
        Self::NotFound(format!("workspace {workspace}"))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SyncProcess { .. } => true,
            Self::NotFound(_) => false,
            Self::Validation(_) => false,
            Self::Config(_) => false,
            Self::Disposed => false,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::SyncProcess { .. } => "sync_process",
            Self::Config(_) => "config",
            Self::Disposed => "disposed",
        }
    }
}

impl From<ValidationError> for PeerError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.0)
    }
}
