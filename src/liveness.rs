// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The process-wide "live" toggle.
//!
//! Only the host flips it. The sync coordinator reacts synchronously through
//! [`LivenessFlag::on_change`]; async observers can use [`LivenessFlag::watch`].

use crate::bus::{Listeners, Unsubscribe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Whether sync processes should be streaming.
#[derive(Debug)]
pub struct LivenessFlag {
    tx: watch::Sender<bool>,
    listeners: Arc<Listeners<bool>>,
}

impl LivenessFlag {
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            listeners: Arc::new(Listeners::new()),
        }
    }

    pub fn is_live(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the flag. Listeners only run when the value actually changes.
    ///
    /// Returns `true` if the value changed.
    pub fn set_live(&self, live: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == live {
                false
            } else {
                *current = live;
                true
            }
        });

        if changed {
            info!(live, "Liveness changed");
            self.listeners.emit(&live);
        }
        changed
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        let next = !self.is_live();
        self.set_live(next);
        next
    }

    /// Synchronous change listener; receives the new value.
    pub fn on_change(&self, listener: impl Fn(&bool) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    /// Receiver for async observers.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for LivenessFlag {
    fn default() -> Self {
        Self::new(false)
    }
}
