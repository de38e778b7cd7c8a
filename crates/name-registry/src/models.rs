//! Data models for the name server registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A serialization format a provider supports for a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializationFormat {
    /// Format name (e.g., "json", "msgpack")
    pub name: String,

    /// Format version
    pub version: String,
}

impl SerializationFormat {
    /// Create a new serialization format descriptor
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The framework's default wire format
    pub fn default_format() -> Self {
        Self::new("json", "1.0")
    }
}

/// Snapshot of the environment a provider process runs in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system name
    pub os: String,

    /// CPU architecture
    pub arch: String,

    /// OS family
    pub family: String,
}

impl EnvironmentInfo {
    /// Capture the current process environment
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

/// A named, identified service capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique service id
    pub id: i64,

    /// Unique service name
    pub name: String,
}

impl ServiceInfo {
    /// Create a new service descriptor
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A network-addressable process offering one or more services
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceProviderInfo {
    /// Hostname or IP the provider listens on
    pub host: String,

    /// Listener port
    pub port: u16,

    /// Environment snapshot taken when the provider announced itself
    pub env: EnvironmentInfo,
}

impl ServiceProviderInfo {
    /// Create a new provider descriptor
    pub fn new(host: impl Into<String>, port: u16, env: EnvironmentInfo) -> Self {
        Self {
            host: host.into(),
            port,
            env,
        }
    }

    /// Render the provider's listener address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One advertisement: a provider's claim to implement a service over a set of formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSupportInfo {
    /// The advertised service
    pub service: ServiceInfo,

    /// The provider advertising it
    pub provider: ServiceProviderInfo,

    /// Supported serialization formats, in the provider's preference order
    pub formats: Vec<SerializationFormat>,
}

impl ServiceSupportInfo {
    /// Create a new advertisement
    pub fn new(
        service: ServiceInfo,
        provider: ServiceProviderInfo,
        formats: Vec<SerializationFormat>,
    ) -> Self {
        Self {
            service,
            provider,
            formats,
        }
    }
}

/// An advertisement as the registry stores it
///
/// The sequence number is assigned by the engine when the registration is
/// accepted and orders listings; it survives restarts through the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRecord {
    /// Position in the global registration order
    pub seq: u64,

    /// When the registration was accepted
    pub registered_at: DateTime<Utc>,

    /// The advertisement itself
    pub support: ServiceSupportInfo,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client request
    Request {
        /// Request ID for correlation
        id: String,
        /// Action to perform
        action: Action,
        /// Action parameters
        params: serde_json::Value,
    },
    /// Server response
    Response {
        /// Request ID
        id: String,
        /// Response data
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// Error information
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
}

/// Available actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Liveness check against the name server itself
    Ping,
    /// Fetch the name server's own provider descriptor
    Info,
    /// Register an advertisement
    Register,
    /// Remove one (service, provider) advertisement
    Unregister,
    /// Remove every advertisement of a provider
    UnregisterAll,
    /// Probe a provider and evict it if unreachable
    CheckProviderStatus,
    /// Look up a service by id
    GetServiceInfoById,
    /// Look up a service by name
    GetServiceInfoByName,
    /// Get the earliest-registered provider for a service
    GetProvider,
    /// Get all providers for a service, in registration order
    GetProviders,
    /// Get every advertisement, in registration order
    GetAllProviders,
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code
    pub code: String,
    /// Error message
    pub message: String,
}
