//! In-memory backend for the registry

use super::StoreBackend;
use crate::{
    error::Result,
    models::{ServiceProviderInfo, SupportRecord},
};
use async_trait::async_trait;
use std::sync::RwLock;

/// In-memory registry backend, kept in sequence order
pub struct MemoryBackend {
    records: RwLock<Vec<SupportRecord>>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        // No initialization needed for in-memory backend
        Ok(())
    }

    async fn insert(&self, record: &SupportRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.push(record.clone());
        records.sort_by_key(|r| r.seq);
        Ok(())
    }

    async fn remove(&self, service_id: i64, provider: &ServiceProviderInfo) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.retain(|r| !(r.support.service.id == service_id && r.support.provider == *provider));
        Ok(())
    }

    async fn remove_provider(&self, provider: &ServiceProviderInfo) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.retain(|r| r.support.provider != *provider);
        Ok(())
    }

    async fn query_by_service_id(&self, id: i64) -> Result<Vec<SupportRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.support.service.id == id)
            .cloned()
            .collect())
    }

    async fn query_by_service_name(&self, name: &str) -> Result<Vec<SupportRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.support.service.name == name)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<SupportRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.clone())
    }

    async fn truncate(&self) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.clear();
        Ok(())
    }
}
