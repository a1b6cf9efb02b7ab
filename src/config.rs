//! Configuration for a peer host.
//!
//! Configuration is passed to [`PeerHost::new()`](crate::PeerHost::new) and
//! can be constructed programmatically or deserialized from JSON/YAML.
//!
//! # Quick Start
//!
//! ```rust
//! use reactive_peer::config::PeerHostConfig;
//!
//! let mut config = PeerHostConfig::for_testing();
//! config.workspaces.push("+gardening.bxxxx".into());
//! config.peers.insert("+gardening.bxxxx".into(), vec!["https://pub.example".into()]);
//! config.live = true;
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! PeerHostConfig
//! ├── workspaces: Vec<String>          # Addresses created through the storage factory
//! ├── peers: Map<String, Vec<String>>  # Workspace → peer endpoints
//! ├── live: bool                       # Initial liveness
//! └── settings: PeerSettings
//!     ├── document_format: String      # Format tag for projection writes
//!     └── coordinator: CoordinatorSettings
//!         └── failure_channel_capacity # Broadcast buffer for sync failures
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "workspaces": ["+gardening.bxxxx"],
//!   "peers": { "+gardening.bxxxx": ["https://pub.example"] },
//!   "live": true,
//!   "settings": { "document_format": "es.4" }
//! }
//! ```

use crate::error::{PeerError, Result};
use crate::projection::DEFAULT_DOCUMENT_FORMAT;
use crate::storage::{PeerEndpoint, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to PeerHost::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `PeerHost::new()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PeerHostConfig {
    /// Workspace addresses to create at startup through the storage factory.
    ///
    /// Stores handed to the host directly do not need to be listed.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceId>,

    /// Initial peers per workspace. Duplicates are dropped on load.
    #[serde(default)]
    pub peers: BTreeMap<WorkspaceId, Vec<PeerEndpoint>>,

    /// Whether sync starts streaming immediately.
    #[serde(default)]
    pub live: bool,

    #[serde(default)]
    pub settings: PeerSettings,
}

impl PeerHostConfig {
    /// Create a minimal config for testing: no workspaces, no peers, not live.
    pub fn for_testing() -> Self {
        Self {
            workspaces: Vec::new(),
            peers: BTreeMap::new(),
            live: false,
            settings: PeerSettings {
                document_format: DEFAULT_DOCUMENT_FORMAT.to_string(),
                coordinator: CoordinatorSettings {
                    failure_channel_capacity: 16,
                },
            },
        }
    }

    /// Check the config before building a host from it.
    pub fn validate(&self) -> Result<()> {
        for workspace in self.workspaces.iter().chain(self.peers.keys()) {
            if !workspace.starts_with('+') {
                return Err(PeerError::Config(format!(
                    "workspace address must start with +: {workspace}"
                )));
            }
        }
        for (workspace, endpoints) in &self.peers {
            if endpoints.iter().any(|p| p.trim().is_empty()) {
                return Err(PeerError::Config(format!(
                    "empty peer endpoint for {workspace}"
                )));
            }
        }
        self.settings.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PeerSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables shared by projections and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Format tag stamped on documents written through projections.
    #[serde(default = "default_document_format")]
    pub document_format: String,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,
}

fn default_document_format() -> String {
    DEFAULT_DOCUMENT_FORMAT.to_string()
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            document_format: default_document_format(),
            coordinator: CoordinatorSettings::default(),
        }
    }
}

impl PeerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.document_format.trim().is_empty() {
            return Err(PeerError::Config("document_format must not be empty".to_string()));
        }
        self.coordinator.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CoordinatorSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for the live sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Buffered sync failures per receiver before the oldest are dropped.
    #[serde(default = "default_failure_channel_capacity")]
    pub failure_channel_capacity: usize,
}

fn default_failure_channel_capacity() -> usize {
    64
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            failure_channel_capacity: default_failure_channel_capacity(),
        }
    }
}

impl CoordinatorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.failure_channel_capacity == 0 {
            return Err(PeerError::Config(
                "failure_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PeerHostConfig::default();
        assert!(config.workspaces.is_empty());
        assert!(config.peers.is_empty());
        assert!(!config.live);
        assert_eq!(config.settings.document_format, "es.4");
        assert_eq!(config.settings.coordinator.failure_channel_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_for_testing_config() {
        let config = PeerHostConfig::for_testing();
        assert_eq!(config.settings.coordinator.failure_channel_capacity, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_workspace() {
        let mut config = PeerHostConfig::for_testing();
        config.workspaces.push("gardening.bxxxx".to_string());
        assert!(matches!(config.validate(), Err(PeerError::Config(_))));

        let mut config = PeerHostConfig::for_testing();
        config.peers.insert("nope".to_string(), vec!["https://a.pub".to_string()]);
        assert!(matches!(config.validate(), Err(PeerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let mut config = PeerHostConfig::for_testing();
        config.peers.insert("+testa.a123".to_string(), vec!["  ".to_string()]);
        assert!(matches!(config.validate(), Err(PeerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = PeerHostConfig::for_testing();
        config.settings.coordinator.failure_channel_capacity = 0;
        assert!(matches!(config.validate(), Err(PeerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_format() {
        let mut config = PeerHostConfig::for_testing();
        config.settings.document_format = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: PeerHostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, PeerHostConfig::default());

        let parsed: PeerHostConfig =
            serde_json::from_str(r#"{"settings": {"coordinator": {}}}"#).unwrap();
        assert_eq!(parsed.settings.document_format, "es.4");
        assert_eq!(parsed.settings.coordinator.failure_channel_capacity, 64);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = PeerHostConfig::for_testing();
        config.workspaces = vec!["+testa.a123".to_string(), "+testb.b234".to_string()];
        config.peers.insert(
            "+testa.a123".to_string(),
            vec!["https://a.pub".to_string(), "https://b.pub".to_string()],
        );
        config.live = true;
        config.settings.document_format = "es.5".to_string();

        let json = serde_json::to_string(&config).unwrap();
        let parsed: PeerHostConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, config);
        assert_eq!(parsed.peers["+testa.a123"].len(), 2);
        assert!(parsed.live);
    }
}
