//! Persistence backends for the registry

pub mod memory;
pub mod sled;

use crate::{
    config::StoreConfig,
    error::Result,
    models::{ServiceProviderInfo, SupportRecord},
};
use async_trait::async_trait;

/// Trait for registry storage backends
///
/// The registry engine is the only writer and treats the backend as the
/// source of truth across restarts. Scans return records in sequence order.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Initialize the backend
    async fn init(&self) -> Result<()>;

    /// Store one advertisement record
    async fn insert(&self, record: &SupportRecord) -> Result<()>;

    /// Remove the record matching (service id, provider), if any
    async fn remove(&self, service_id: i64, provider: &ServiceProviderInfo) -> Result<()>;

    /// Remove every record of a provider
    async fn remove_provider(&self, provider: &ServiceProviderInfo) -> Result<()>;

    /// All records for a service id, in sequence order
    async fn query_by_service_id(&self, id: i64) -> Result<Vec<SupportRecord>>;

    /// All records for a service name, in sequence order
    async fn query_by_service_name(&self, name: &str) -> Result<Vec<SupportRecord>>;

    /// Full scan, in sequence order
    async fn all(&self) -> Result<Vec<SupportRecord>>;

    /// Drop every record
    async fn truncate(&self) -> Result<()>;
}

/// Open the backend named by the configuration
///
/// Selection happens once at startup; the engine only ever sees the trait.
pub async fn open_store(config: &StoreConfig) -> Result<Box<dyn StoreBackend>> {
    match config {
        StoreConfig::Memory => Ok(Box::new(memory::MemoryBackend::new())),
        StoreConfig::Sled { path } => Ok(Box::new(sled::SledBackend::new(path).await?)),
    }
}
