//! Configuration structures for the name server

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameServerConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Store selection
    #[serde(default)]
    pub store: StoreConfig,
    /// Liveness probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Keep service id/name bindings after their last provider is gone
    #[serde(default)]
    pub retain_services: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:7364")
    pub listen_addr: String,
}

/// Which persistence backend to open at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Non-durable in-memory store
    Memory,
    /// Durable sled store at the given path
    Sled {
        /// Database directory
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// Liveness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe deadline in seconds; an unanswered probe counts as unreachable
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    5
}

impl NameServerConfig {
    /// Load configuration from file
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use async_fs::File;
        use futures::io::AsyncReadExt;

        let mut file = File::open(path.as_ref()).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        // Try YAML first, then JSON
        if path.as_ref().extension().and_then(|s| s.to_str()) == Some("yaml")
            || path.as_ref().extension().and_then(|s| s.to_str()) == Some("yml")
        {
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }
}

impl Default for NameServerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:7364".to_string(),
            },
            store: StoreConfig::default(),
            probe: ProbeConfig::default(),
            retain_services: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_yaml() {
        let config = NameServerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: NameServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.listen_addr, config.server.listen_addr);
        assert_eq!(parsed.probe.timeout_secs, 5);
        assert!(!parsed.retain_services);
    }

    #[test]
    fn store_config_selects_sled() {
        let yaml = "server:\n  listen_addr: 0.0.0.0:7364\nstore:\n  kind: sled\n  path: /var/lib/ns\n";
        let parsed: NameServerConfig = serde_yaml::from_str(yaml).unwrap();
        match parsed.store {
            StoreConfig::Sled { path } => assert_eq!(path, PathBuf::from("/var/lib/ns")),
            other => panic!("unexpected store config: {other:?}"),
        }
    }
}
