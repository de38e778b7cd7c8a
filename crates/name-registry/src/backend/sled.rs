//! Sled database backend for the registry

use super::StoreBackend;
use crate::{
    error::Result,
    models::{ServiceProviderInfo, SupportRecord},
};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

/// Sled-based registry backend
///
/// Records are keyed by their big-endian sequence number, so iterating the
/// tree yields registration order.
pub struct SledBackend {
    /// Database instance
    db: sled::Db,
    /// Advertisement records tree
    supports: sled::Tree,
}

impl SledBackend {
    /// Create a new sled backend
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure the directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening sled database at {:?}", path);

        let db = sled::open(path)?;
        let supports = db.open_tree("supports")?;

        Ok(Self { db, supports })
    }

    /// Create an in-memory sled backend (for testing)
    pub async fn in_memory() -> Result<Self> {
        info!("Creating in-memory sled database");

        let db = sled::Config::new().temporary(true).open()?;
        let supports = db.open_tree("supports")?;

        Ok(Self { db, supports })
    }

    fn decode(value: &[u8]) -> Result<SupportRecord> {
        Ok(serde_json::from_slice(value)?)
    }

    /// Collect records matching a predicate, in key (sequence) order
    fn scan(&self, mut keep: impl FnMut(&SupportRecord) -> bool) -> Result<Vec<SupportRecord>> {
        let mut records = Vec::new();
        for result in self.supports.iter() {
            let (_, value) = result?;
            let record = Self::decode(&value)?;
            if keep(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Keys of records matching a predicate
    fn matching_keys(
        &self,
        keep: impl Fn(&SupportRecord) -> bool,
    ) -> Result<Vec<sled::IVec>> {
        let mut keys = Vec::new();
        for result in self.supports.iter() {
            let (key, value) = result?;
            if keep(&Self::decode(&value)?) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl StoreBackend for SledBackend {
    async fn init(&self) -> Result<()> {
        // Flush to ensure database is ready
        self.db.flush_async().await?;
        Ok(())
    }

    async fn insert(&self, record: &SupportRecord) -> Result<()> {
        debug!(
            "Storing advertisement: service {} by {}",
            record.support.service.id,
            record.support.provider.address()
        );

        let value = serde_json::to_vec(record)?;
        self.supports.insert(record.seq.to_be_bytes(), value)?;
        self.supports.flush_async().await?;

        Ok(())
    }

    async fn remove(&self, service_id: i64, provider: &ServiceProviderInfo) -> Result<()> {
        debug!(
            "Removing advertisement: service {} by {}",
            service_id,
            provider.address()
        );

        let keys = self.matching_keys(|r| {
            r.support.service.id == service_id && r.support.provider == *provider
        })?;
        for key in keys {
            self.supports.remove(key)?;
        }
        self.supports.flush_async().await?;

        Ok(())
    }

    async fn remove_provider(&self, provider: &ServiceProviderInfo) -> Result<()> {
        debug!("Removing all advertisements of {}", provider.address());

        let keys = self.matching_keys(|r| r.support.provider == *provider)?;
        for key in keys {
            self.supports.remove(key)?;
        }
        self.supports.flush_async().await?;

        Ok(())
    }

    async fn query_by_service_id(&self, id: i64) -> Result<Vec<SupportRecord>> {
        self.scan(|r| r.support.service.id == id)
    }

    async fn query_by_service_name(&self, name: &str) -> Result<Vec<SupportRecord>> {
        self.scan(|r| r.support.service.name == name)
    }

    async fn all(&self) -> Result<Vec<SupportRecord>> {
        self.scan(|_| true)
    }

    async fn truncate(&self) -> Result<()> {
        debug!("Truncating advertisement store");

        self.supports.clear()?;
        self.supports.flush_async().await?;

        Ok(())
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        // Attempt to flush on drop
        if let Err(e) = self.db.flush() {
            error!("Failed to flush database on drop: {}", e);
        }
    }
}
