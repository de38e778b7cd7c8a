//! Runtime-agnostic name server registry for an RPC framework
//!
//! Service providers advertise which services they implement (by id and
//! name) and over which serialization formats; remote clients discover
//! currently-live providers. The registry engine gives atomic, ordered
//! semantics under concurrent callers, writes through to a pluggable
//! persistence backend, and evicts dead providers via an active liveness
//! probe.
//!
//! # Architecture
//!
//! The crate is runtime-agnostic, working with any async runtime (tokio,
//! async-std, smol, etc). It uses:
//!
//! - `async-tungstenite` for the WebSocket dispatcher (without runtime features)
//! - `async-net` for networking
//! - `sled` for durable storage
//! - Standard `futures` traits
//!
//! # Example
//!
//! ```no_run
//! use name_registry::{Registry, TcpProber, WsServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Registry::new().await;
//! let prober = Arc::new(TcpProber::default());
//! let server = WsServer::bind("127.0.0.1:7364", registry, prober).await?;
//!
//! // Accept connections - runtime agnostic
//! loop {
//!     let handler = server.accept().await?;
//!     // User chooses how to run the handler
//!     // e.g., tokio::spawn, smol::spawn, etc.
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod probe;
pub mod registry;
pub mod server;

pub use client::NsClient;
pub use config::{NameServerConfig, ProbeConfig, ServerConfig, StoreConfig};
pub use error::{Error, Result};
pub use models::*;
pub use probe::{LivenessProbe, ProbeOutcome, TcpProber};
pub use registry::Registry;
pub use server::{ConnectionHandler, WsServer};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        Error, NsClient, Registry, Result, SerializationFormat, ServiceInfo, ServiceProviderInfo,
        ServiceSupportInfo, TcpProber, WsServer,
    };
}
