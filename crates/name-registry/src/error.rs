//! Error types for the name server registry

use thiserror::Error;

/// Name server error type
#[derive(Error, Debug)]
pub enum Error {
    /// An advertisement already exists for this (service, provider) pair
    #[error("service provider already registered: {0}")]
    ProviderExists(String),

    /// Advertisement rejected before any mutation took place
    #[error("invalid service support: {0}")]
    InvalidSupport(String),

    /// Service id or name contradicts a live registration
    #[error("service identity mismatch: {0}")]
    ServiceMismatch(String),

    /// Durable store failure
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    /// Unexpected wire traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the remote name server
    #[error("remote error {code}: {message}")]
    Remote {
        /// Wire error code
        code: String,
        /// Human-readable message
        message: String,
    },

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Stable code for the wire protocol
    pub fn code(&self) -> &str {
        match self {
            Error::ProviderExists(_) => "provider_exists",
            Error::InvalidSupport(_) => "invalid_support",
            Error::ServiceMismatch(_) => "service_mismatch",
            Error::Store(_) => "store_error",
            Error::Remote { code, .. } => code,
            _ => "internal",
        }
    }

    /// Rebuild a typed error from a wire code, used on the client side
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            "provider_exists" => Error::ProviderExists(message),
            "invalid_support" => Error::InvalidSupport(message),
            "service_mismatch" => Error::ServiceMismatch(message),
            _ => Error::Remote {
                code: code.to_string(),
                message,
            },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
