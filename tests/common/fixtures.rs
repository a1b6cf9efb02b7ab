//! Fixtures for stores, authors and writes.

#![allow(dead_code)]

use super::RecordingTransport;
use reactive_peer::config::PeerHostConfig;
use reactive_peer::identity::AuthorKeypair;
use reactive_peer::memory::{MemoryStorage, MemoryStorageFactory};
use reactive_peer::storage::{DocToSet, SharedStorage, StorageHandle, WriteResult};
use reactive_peer::PeerHost;
use std::sync::Arc;

pub const WS_A: &str = "+testa.a123";
pub const WS_B: &str = "+testb.b234";
pub const WS_C: &str = "+testc.c567";

pub const PUB_A: &str = "https://a.pub";
pub const PUB_B: &str = "https://b.pub";
pub const PUB_C: &str = "https://c.pub";

pub fn suzy() -> AuthorKeypair {
    AuthorKeypair::new("@suzy.b123", "secret-suzy")
}

pub fn bob() -> AuthorKeypair {
    AuthorKeypair::new("@bob.b999", "secret-bob")
}

pub fn memory(workspace: &str) -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new(workspace))
}

/// Write `content` at `path` as `author`.
pub fn write_as(storage: &dyn StorageHandle, author: &AuthorKeypair, path: &str, content: &str) -> WriteResult {
    storage
        .write(
            author,
            DocToSet {
                format: "es.4".to_string(),
                path: path.to_string(),
                content: content.to_string(),
                delete_after: None,
            },
        )
        .expect("valid write")
}

pub fn write(storage: &dyn StorageHandle, path: &str, content: &str) -> WriteResult {
    write_as(storage, &suzy(), path, content)
}

/// Host over the given stores with a recording transport, signed in as suzy.
pub fn host_with(storages: Vec<Arc<MemoryStorage>>, transport: Arc<RecordingTransport>) -> PeerHost {
    PeerHost::builder(PeerHostConfig::for_testing())
        .storages(storages.into_iter().map(|s| s as SharedStorage))
        .author(suzy())
        .transport(transport)
        .factory(Arc::new(MemoryStorageFactory))
        .build()
        .expect("valid test host")
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
