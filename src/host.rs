// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The peer host: one object wiring the registries, the subscription engine,
//! projections and the live sync coordinator together.
//!
//! Everything is injected at construction; nothing is global. Hosts that
//! need finer control can reach the individual components through the
//! accessors.
//!
//! # Example
//!
//! ```rust
//! use reactive_peer::config::PeerHostConfig;
//! use reactive_peer::identity::AuthorKeypair;
//! use reactive_peer::storage::QueryOpts;
//! use reactive_peer::PeerHost;
//!
//! let mut config = PeerHostConfig::for_testing();
//! config.workspaces.push("+gardening.bxxxx".into());
//!
//! let host = PeerHost::new(config).unwrap();
//! host.set_current_author(Some(AuthorKeypair::new("@suzy.bxxxx", "secret")));
//!
//! let paths = host.paths("+gardening.bxxxx", QueryOpts::default());
//! let doc = host.document("+gardening.bxxxx", "/wiki/roses");
//! doc.set("Prune in March", None).unwrap();
//! assert_eq!(paths.paths(), vec!["/wiki/roses"]);
//! ```

use crate::config::{PeerHostConfig, PeerSettings};
use crate::coordinator::LiveSyncCoordinator;
use crate::error::{PeerError, Result};
use crate::identity::{display_name_path, AuthorKeypair, CurrentAuthor};
use crate::liveness::LivenessFlag;
use crate::memory::MemoryStorageFactory;
use crate::metrics;
use crate::peer::PeerRegistry;
use crate::projection::{DocumentProjection, PathsProjection};
use crate::storage::{PeerEndpoint, QueryOpts, SharedStorage, StorageFactory, WorkspaceId, WriteEvent};
use crate::store::StoreRegistry;
use crate::subscription::{Subscription, SubscriptionCriteria, SubscriptionEngine};
use crate::transport::{NoOpTransport, SyncStats, SyncTransport};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Outcome of a one-shot sync with one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSyncOutcome {
    pub peer: PeerEndpoint,
    pub result: Result<SyncStats>,
}

impl PeerSyncOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Builder for [`PeerHost`].
pub struct PeerHostBuilder {
    config: PeerHostConfig,
    storages: Vec<SharedStorage>,
    author: Option<AuthorKeypair>,
    transport: Option<Arc<dyn SyncTransport>>,
    factory: Option<Arc<dyn StorageFactory>>,
}

impl PeerHostBuilder {
    /// Register a store at startup.
    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storages.push(storage);
        self
    }

    pub fn storages(mut self, storages: impl IntoIterator<Item = SharedStorage>) -> Self {
        self.storages.extend(storages);
        self
    }

    /// Initial signed-in author.
    pub fn author(mut self, author: AuthorKeypair) -> Self {
        self.author = Some(author);
        self
    }

    /// Transport for sync processes. Defaults to [`NoOpTransport`].
    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Factory for workspaces added by address.
    pub fn factory(mut self, factory: Arc<dyn StorageFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate the config, create the configured workspaces and start the
    /// coordinator.
    pub fn build(self) -> Result<PeerHost> {
        self.config.validate()?;

        let stores = Arc::new(StoreRegistry::with_storages(self.storages));
        for workspace in &self.config.workspaces {
            if stores.contains(workspace) {
                continue;
            }
            let Some(factory) = &self.factory else {
                return Err(PeerError::Config(format!(
                    "workspace {workspace} listed but no storage factory configured"
                )));
            };
            let storage = factory.create(workspace)?;
            stores.add(workspace.clone(), storage);
        }

        let peers = Arc::new(PeerRegistry::with_peers(self.config.peers));
        let liveness = Arc::new(LivenessFlag::new(self.config.live));
        let author = Arc::new(CurrentAuthor::new(self.author));
        let transport = self.transport.unwrap_or_else(|| Arc::new(NoOpTransport));
        let engine = SubscriptionEngine::new(Arc::clone(&stores));
        let coordinator = LiveSyncCoordinator::new(
            Arc::clone(&stores),
            Arc::clone(&peers),
            Arc::clone(&liveness),
            Arc::clone(&transport),
            &self.config.settings.coordinator,
        );

        info!(
            workspaces = stores.len(),
            live = liveness.is_live(),
            signed_in = author.is_signed_in(),
            "Peer host ready"
        );

        Ok(PeerHost {
            settings: self.config.settings,
            stores,
            peers,
            liveness,
            author,
            transport,
            factory: self.factory,
            engine,
            coordinator,
        })
    }
}

/// A running peer.
pub struct PeerHost {
    settings: PeerSettings,
    stores: Arc<StoreRegistry>,
    peers: Arc<PeerRegistry>,
    liveness: Arc<LivenessFlag>,
    author: Arc<CurrentAuthor>,
    transport: Arc<dyn SyncTransport>,
    factory: Option<Arc<dyn StorageFactory>>,
    engine: SubscriptionEngine,
    coordinator: LiveSyncCoordinator,
}

impl PeerHost {
    /// Host with in-memory storage for configured workspaces and no network.
    pub fn new(config: PeerHostConfig) -> Result<Self> {
        Self::builder(config).factory(Arc::new(MemoryStorageFactory)).build()
    }

    pub fn builder(config: PeerHostConfig) -> PeerHostBuilder {
        PeerHostBuilder {
            config,
            storages: Vec::new(),
            author: None,
            transport: None,
            factory: None,
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Workspaces
    // ───────────────────────────────────────────────────────────────────────

    /// Registered workspaces in insertion order.
    pub fn workspaces(&self) -> Vec<WorkspaceId> {
        self.stores.list()
    }

    pub fn storage(&self, workspace: &str) -> Option<SharedStorage> {
        self.stores.get(workspace)
    }

    /// Register a store under its own workspace. No-op if already present.
    pub fn add_storage(&self, storage: SharedStorage) -> bool {
        let workspace = storage.workspace().to_string();
        self.stores.add(workspace, storage)
    }

    /// Create and register a store for `workspace` through the factory.
    ///
    /// Returns `Ok(false)` if the workspace is already registered.
    pub fn add_workspace(&self, workspace: &str) -> Result<bool> {
        if self.stores.contains(workspace) {
            return Ok(false);
        }
        let Some(factory) = &self.factory else {
            return Err(PeerError::NotFound("storage factory".to_string()));
        };
        let storage = factory.create(workspace)?;
        Ok(self.stores.add(workspace, storage))
    }

    pub fn remove_workspace(&self, workspace: &str) -> bool {
        self.stores.remove(workspace).is_some()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Peers
    // ───────────────────────────────────────────────────────────────────────

    pub fn workspace_peers(&self, workspace: &str) -> Vec<PeerEndpoint> {
        self.peers.get(workspace)
    }

    pub fn set_workspace_peers<P>(&self, workspace: &str, endpoints: P) -> bool
    where
        P: IntoIterator,
        P::Item: Into<PeerEndpoint>,
    {
        self.peers.set(workspace, endpoints)
    }

    pub fn update_workspace_peers(
        &self,
        workspace: &str,
        f: impl FnOnce(Vec<PeerEndpoint>) -> Vec<PeerEndpoint>,
    ) -> bool {
        self.peers.update(workspace, f)
    }

    /// Every workspace's peers.
    pub fn peers(&self) -> IndexMap<WorkspaceId, Vec<PeerEndpoint>> {
        self.peers.all()
    }

    /// Replace the whole workspace → peers map.
    pub fn set_peers<I, P>(&self, next: I)
    where
        I: IntoIterator<Item = (WorkspaceId, P)>,
        P: IntoIterator,
        P::Item: Into<PeerEndpoint>,
    {
        self.peers.replace_all(next)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Identity and liveness
    // ───────────────────────────────────────────────────────────────────────

    pub fn current_author(&self) -> Option<AuthorKeypair> {
        self.author.get()
    }

    pub fn set_current_author(&self, author: Option<AuthorKeypair>) {
        self.author.set(author)
    }

    pub fn sign_out(&self) {
        self.author.sign_out()
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    /// Returns `true` if the flag changed.
    pub fn set_live(&self, live: bool) -> bool {
        self.liveness.set_live(live)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reads and writes
    // ───────────────────────────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        criteria: SubscriptionCriteria,
        on_event: impl Fn(&WriteEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.engine.subscribe(criteria, on_event)
    }

    pub fn paths(&self, workspace: &str, query: QueryOpts) -> PathsProjection {
        PathsProjection::new(&self.engine, workspace, query)
    }

    pub fn document(&self, workspace: &str, path: &str) -> DocumentProjection {
        DocumentProjection::new(&self.engine, Arc::clone(&self.author), workspace, path)
            .with_format(self.settings.document_format.clone())
    }

    /// The current author's display name document in `workspace`.
    ///
    /// `None` when nobody is signed in.
    pub fn display_name(&self, workspace: &str) -> Option<DocumentProjection> {
        let author = self.author.get()?;
        Some(self.document(workspace, &display_name_path(&author.address)))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sync
    // ───────────────────────────────────────────────────────────────────────

    /// Sync `workspace` once with each of its peers, concurrently.
    ///
    /// Fails as a whole only if the host was disposed or the workspace is
    /// unknown or has no peers; a failing peer is reported in its own outcome.
    pub async fn sync(&self, workspace: &str) -> Result<Vec<PeerSyncOutcome>> {
        if self.coordinator.is_disposed() {
            return Err(PeerError::Disposed);
        }
        let storage = self
            .stores
            .get(workspace)
            .ok_or_else(|| PeerError::workspace_not_found(workspace))?;
        let peers = self.peers.get(workspace);
        if peers.is_empty() {
            return Err(PeerError::NotFound(format!("peers for workspace {workspace}")));
        }

        info!(workspace = %workspace, peers = peers.len(), "Syncing once");
        // Peers run concurrently; outcomes keep the registry order.
        let outcomes = futures::future::join_all(peers.into_iter().map(|peer| {
            let storage = Arc::clone(&storage);
            async move {
                let result = self
                    .transport
                    .sync_once(storage, &peer)
                    .await
                    .map_err(|e| PeerError::sync_process(workspace, &peer, e.to_string()));

                metrics::record_one_shot_sync(workspace, result.is_ok());
                match &result {
                    Ok(stats) => info!(
                        workspace = %workspace,
                        peer = %peer,
                        pushed = stats.pushed,
                        pulled = stats.pulled,
                        "One-shot sync complete"
                    ),
                    Err(e) => warn!(workspace = %workspace, peer = %peer, error = %e, "One-shot sync failed"),
                }
                PeerSyncOutcome { peer, result }
            }
        }))
        .await;
        Ok(outcomes)
    }

    /// Isolated sync failures from the live coordinator.
    pub fn sync_failures(&self) -> broadcast::Receiver<PeerError> {
        self.coordinator.failures()
    }

    /// Stop all sync processes. The host stays readable; live sync is over.
    pub fn dispose(&self) {
        self.coordinator.dispose();
    }

    // ───────────────────────────────────────────────────────────────────────
    // Components
    // ───────────────────────────────────────────────────────────────────────

    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    pub fn peer_registry(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    pub fn liveness(&self) -> &Arc<LivenessFlag> {
        &self.liveness
    }

    pub fn engine(&self) -> &SubscriptionEngine {
        &self.engine
    }

    pub fn coordinator(&self) -> &LiveSyncCoordinator {
        &self.coordinator
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }
}

impl std::fmt::Debug for PeerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHost")
            .field("workspaces", &self.workspaces())
            .field("live", &self.is_live())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
