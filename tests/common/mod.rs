//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - A recording SyncTransport that tracks every process it opens
//! - Fixtures for stores, authors and writes

pub mod fixtures;
pub mod recording_transport;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use recording_transport::*;
