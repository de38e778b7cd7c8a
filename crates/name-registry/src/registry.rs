//! Core registry engine
//!
//! The engine owns the ordered advertisement list plus its two service
//! indices and is the single synchronization point for all callers. Every
//! mutation writes through to the backend before the in-memory index is
//! touched, so a failed durable write leaves no partial state behind.

use crate::{
    backend::{StoreBackend, memory::MemoryBackend},
    error::{Error, Result},
    models::*,
    probe::{LivenessProbe, ProbeOutcome},
};
use chrono::Utc;
use futures::lock::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Name server registry engine with pluggable backend
pub struct Registry {
    /// Storage backend, the source of truth across restarts
    backend: Box<dyn StoreBackend>,
    /// Ordered advertisements and derived indices
    state: Mutex<Index>,
    /// Keep id/name bindings alive after their last advertisement is gone
    retain_services: bool,
}

/// In-memory view over the backend's records
#[derive(Default)]
struct Index {
    /// Advertisements in registration order
    entries: Vec<SupportRecord>,
    /// Service name keyed by id
    names_by_id: HashMap<i64, String>,
    /// Service id keyed by name
    ids_by_name: HashMap<String, i64>,
    /// Next sequence number to hand out
    next_seq: u64,
}

impl Index {
    fn contains(&self, service_id: i64, provider: &ServiceProviderInfo) -> bool {
        self.entries
            .iter()
            .any(|r| r.support.service.id == service_id && r.support.provider == *provider)
    }

    fn apply_insert(&mut self, record: SupportRecord) {
        self.next_seq = self.next_seq.max(record.seq + 1);
        let service = &record.support.service;
        self.names_by_id.insert(service.id, service.name.clone());
        self.ids_by_name.insert(service.name.clone(), service.id);
        self.entries.push(record);
    }

    /// Drop the id/name binding once no advertisement references the service
    fn drop_orphaned_service(&mut self, service_id: i64) {
        if self.entries.iter().any(|r| r.support.service.id == service_id) {
            return;
        }
        if let Some(name) = self.names_by_id.remove(&service_id) {
            self.ids_by_name.remove(&name);
        }
    }

    /// Reject a ServiceInfo that contradicts a live id/name binding
    fn check_identity(&self, service: &ServiceInfo) -> Result<()> {
        if let Some(name) = self.names_by_id.get(&service.id) {
            if *name != service.name {
                return Err(Error::ServiceMismatch(format!(
                    "id {} is bound to \"{}\", not \"{}\"",
                    service.id, name, service.name
                )));
            }
        }
        if let Some(&id) = self.ids_by_name.get(&service.name) {
            if id != service.id {
                return Err(Error::ServiceMismatch(format!(
                    "name \"{}\" is bound to id {}, not {}",
                    service.name, id, service.id
                )));
            }
        }
        Ok(())
    }
}

impl Registry {
    /// Create a registry over a non-durable in-memory backend
    pub async fn new() -> Self {
        Self::open(Box::new(MemoryBackend::new()), false)
            .await
            .expect("in-memory backend cannot fail to open")
    }

    /// Open a registry over the given backend, rebuilding the index from it
    pub async fn open(backend: Box<dyn StoreBackend>, retain_services: bool) -> Result<Self> {
        backend.init().await?;

        let mut records = backend.all().await?;
        records.sort_by_key(|r| r.seq);

        let mut index = Index::default();
        for record in records {
            index.apply_insert(record);
        }
        if !index.entries.is_empty() {
            info!(
                "Recovered {} advertisements for {} services from store",
                index.entries.len(),
                index.names_by_id.len()
            );
        }

        Ok(Self {
            backend,
            state: Mutex::new(index),
            retain_services,
        })
    }

    /// Register an advertisement
    ///
    /// Fails with [`Error::ProviderExists`] if the (service, provider) pair
    /// is already registered; the existing formats list is left untouched.
    pub async fn register(&self, support: ServiceSupportInfo) -> Result<()> {
        if support.formats.is_empty() {
            return Err(Error::InvalidSupport(format!(
                "service {} advertised with no serialization formats",
                support.service.id
            )));
        }

        let mut state = self.state.lock().await;

        state.check_identity(&support.service)?;
        if state.contains(support.service.id, &support.provider) {
            return Err(Error::ProviderExists(format!(
                "{} for service {}",
                support.provider.address(),
                support.service.id
            )));
        }

        let record = SupportRecord {
            seq: state.next_seq,
            registered_at: Utc::now(),
            support,
        };

        // Durable write first; the index stays untouched if it fails
        self.backend.insert(&record).await?;

        info!(
            "Registered service {} (\"{}\") by {}",
            record.support.service.id,
            record.support.service.name,
            record.support.provider.address()
        );
        state.apply_insert(record);

        Ok(())
    }

    /// Remove one (service, provider) advertisement
    ///
    /// Removal is idempotent: the call succeeds whether or not the
    /// advertisement existed. Only a failed durable write is an error.
    pub async fn unregister(
        &self,
        service: &ServiceInfo,
        provider: &ServiceProviderInfo,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;

        if state.contains(service.id, provider) {
            self.backend.remove(service.id, provider).await?;
            state
                .entries
                .retain(|r| !(r.support.service.id == service.id && r.support.provider == *provider));
            if !self.retain_services {
                state.drop_orphaned_service(service.id);
            }
            debug!(
                "Unregistered service {} by {}",
                service.id,
                provider.address()
            );
        }

        Ok(true)
    }

    /// Remove every advertisement of a provider, across all services
    pub async fn unregister_all(&self, provider: &ServiceProviderInfo) -> Result<bool> {
        let mut state = self.state.lock().await;

        let service_ids: Vec<i64> = state
            .entries
            .iter()
            .filter(|r| r.support.provider == *provider)
            .map(|r| r.support.service.id)
            .collect();

        if !service_ids.is_empty() {
            self.backend.remove_provider(provider).await?;
            state.entries.retain(|r| r.support.provider != *provider);
            if !self.retain_services {
                for id in &service_ids {
                    state.drop_orphaned_service(*id);
                }
            }
            info!(
                "Unregistered {} advertisements of {}",
                service_ids.len(),
                provider.address()
            );
        }

        Ok(true)
    }

    /// Probe a provider and evict all of its advertisements if unreachable
    ///
    /// Returns `true` if the provider was treated as dead. The probe runs
    /// with no registry lock held; eviction re-validates under the lock, so
    /// a concurrent unregister is benign.
    pub async fn check_provider_status(
        &self,
        probe: &dyn LivenessProbe,
        provider: &ServiceProviderInfo,
    ) -> Result<bool> {
        match probe.probe(provider).await {
            ProbeOutcome::Reachable => Ok(false),
            ProbeOutcome::Unreachable => {
                warn!("Provider {} unreachable, evicting", provider.address());
                self.unregister_all(provider).await?;
                Ok(true)
            }
        }
    }

    /// Clear the index and truncate the store
    ///
    /// Administrative only; callers must guarantee no other operation is in
    /// flight (the lock serializes calls, but half a workload disappearing
    /// is rarely what a live caller expects).
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.backend.truncate().await?;
        *state = Index::default();
        info!("Registry reset");
        Ok(())
    }

    /// Look up a service by id
    pub async fn get_service_info_by_id(&self, id: i64) -> Option<ServiceInfo> {
        let state = self.state.lock().await;
        state
            .names_by_id
            .get(&id)
            .map(|name| ServiceInfo::new(id, name.clone()))
    }

    /// Look up a service by name
    pub async fn get_service_info_by_name(&self, name: &str) -> Option<ServiceInfo> {
        let state = self.state.lock().await;
        state
            .ids_by_name
            .get(name)
            .map(|&id| ServiceInfo::new(id, name))
    }

    /// Earliest-registered advertisement for a service
    pub async fn get_provider(&self, service: &ServiceInfo) -> Option<ServiceSupportInfo> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .find(|r| r.support.service.id == service.id)
            .map(|r| r.support.clone())
    }

    /// All advertisements for a service, in registration order
    pub async fn get_providers(&self, service: &ServiceInfo) -> Vec<ServiceSupportInfo> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|r| r.support.service.id == service.id)
            .map(|r| r.support.clone())
            .collect()
    }

    /// Every advertisement, in the order registrations were accepted
    pub async fn get_all_providers(&self) -> Vec<ServiceSupportInfo> {
        let state = self.state.lock().await;
        state.entries.iter().map(|r| r.support.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sled::SledBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn provider(host: &str, port: u16) -> ServiceProviderInfo {
        ServiceProviderInfo::new(host, port, EnvironmentInfo::current())
    }

    fn support(service: &ServiceInfo, provider: &ServiceProviderInfo) -> ServiceSupportInfo {
        ServiceSupportInfo::new(
            service.clone(),
            provider.clone(),
            vec![SerializationFormat::default_format()],
        )
    }

    /// Probe double with a fixed answer
    struct ScriptedProbe(ProbeOutcome);

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn probe(&self, _provider: &ServiceProviderInfo) -> ProbeOutcome {
            self.0
        }
    }

    /// Backend double whose writes can be made to fail
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: std::sync::Arc<AtomicBool>,
    }

    impl FlakyBackend {
        fn new(fail_writes: std::sync::Arc<AtomicBool>) -> Self {
            Self {
                inner: MemoryBackend::new(),
                fail_writes,
            }
        }

        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(Error::Protocol("injected write failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StoreBackend for FlakyBackend {
        async fn init(&self) -> Result<()> {
            self.inner.init().await
        }
        async fn insert(&self, record: &SupportRecord) -> Result<()> {
            self.check()?;
            self.inner.insert(record).await
        }
        async fn remove(&self, service_id: i64, provider: &ServiceProviderInfo) -> Result<()> {
            self.check()?;
            self.inner.remove(service_id, provider).await
        }
        async fn remove_provider(&self, provider: &ServiceProviderInfo) -> Result<()> {
            self.check()?;
            self.inner.remove_provider(provider).await
        }
        async fn query_by_service_id(&self, id: i64) -> Result<Vec<SupportRecord>> {
            self.inner.query_by_service_id(id).await
        }
        async fn query_by_service_name(&self, name: &str) -> Result<Vec<SupportRecord>> {
            self.inner.query_by_service_name(name).await
        }
        async fn all(&self) -> Result<Vec<SupportRecord>> {
            self.inner.all().await
        }
        async fn truncate(&self) -> Result<()> {
            self.check()?;
            self.inner.truncate().await
        }
    }

    #[smol_potat::test]
    async fn duplicate_registration_is_a_conflict() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);

        registry.register(support(&service, &p)).await.unwrap();

        // Same pair with a different formats list must not overwrite
        let mut second = support(&service, &p);
        second.formats = vec![SerializationFormat::new("msgpack", "2.0")];
        let err = registry.register(second).await.unwrap_err();
        assert!(matches!(err, Error::ProviderExists(_)));

        let kept = registry.get_provider(&service).await.unwrap();
        assert_eq!(kept.formats, vec![SerializationFormat::default_format()]);
    }

    #[smol_potat::test]
    async fn empty_formats_are_rejected_before_mutation() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let mut sup = support(&service, &provider("tes1", 5));
        sup.formats.clear();

        let err = registry.register(sup).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSupport(_)));
        assert!(registry.get_all_providers().await.is_empty());
        assert!(registry.get_service_info_by_id(1).await.is_none());
    }

    #[smol_potat::test]
    async fn conflicting_service_identity_is_rejected() {
        let registry = Registry::new().await;
        registry
            .register(support(&ServiceInfo::new(1, "test"), &provider("a", 1)))
            .await
            .unwrap();

        let err = registry
            .register(support(&ServiceInfo::new(1, "other"), &provider("b", 2)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceMismatch(_)));

        let err = registry
            .register(support(&ServiceInfo::new(9, "test"), &provider("b", 2)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceMismatch(_)));
    }

    #[smol_potat::test]
    async fn listings_preserve_registration_order() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let service2 = ServiceInfo::new(2, "tes2");
        let (a, b, c) = (provider("tes1", 1), provider("test2", 2), provider("test3", 3));
        let d = provider("tes1", 4);

        registry.register(support(&service, &a)).await.unwrap();
        registry.register(support(&service, &b)).await.unwrap();
        registry.register(support(&service, &c)).await.unwrap();
        registry.register(support(&service2, &d)).await.unwrap();

        let providers = registry.get_providers(&service).await;
        assert_eq!(providers.len(), 3);
        assert_eq!(providers[0].provider, a);
        assert_eq!(providers[1].provider, b);
        assert_eq!(providers[2].provider, c);

        let all = registry.get_all_providers().await;
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].provider, d);
        assert_eq!(all[3].service, service2);

        // First registered wins for get_provider
        assert_eq!(registry.get_provider(&service).await.unwrap().provider, a);

        // Removing the middle entry must not reorder the rest
        registry.unregister(&service, &b).await.unwrap();
        let providers = registry.get_providers(&service).await;
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].provider, a);
        assert_eq!(providers[1].provider, c);
    }

    #[smol_potat::test]
    async fn unregister_is_idempotent() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);

        // Nothing registered yet: still a success, no mutation
        assert!(registry.unregister(&service, &p).await.unwrap());
        assert!(registry.get_all_providers().await.is_empty());

        registry.register(support(&service, &p)).await.unwrap();
        assert!(registry.unregister(&service, &p).await.unwrap());
        assert!(registry.unregister(&service, &p).await.unwrap());
        assert!(registry.get_provider(&service).await.is_none());
    }

    #[smol_potat::test]
    async fn unregister_all_spans_services() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let service2 = ServiceInfo::new(2, "tes2");
        let (a, b, c) = (provider("tes1", 1), provider("test2", 2), provider("test3", 3));

        registry.register(support(&service, &a)).await.unwrap();
        registry.register(support(&service, &b)).await.unwrap();
        registry.register(support(&service, &c)).await.unwrap();
        registry.register(support(&service2, &a)).await.unwrap();

        assert!(registry.unregister_all(&a).await.unwrap());

        let all = registry.get_all_providers().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].provider, b);
        assert_eq!(all[1].provider, c);
        assert!(registry.get_provider(&service2).await.is_none());
    }

    #[smol_potat::test]
    async fn unreachable_probe_evicts_every_advertisement() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let service2 = ServiceInfo::new(2, "tes2");
        let p = provider("tes1", 5);
        let other = provider("test2", 6);

        registry.register(support(&service, &p)).await.unwrap();
        registry.register(support(&service2, &p)).await.unwrap();
        registry.register(support(&service, &other)).await.unwrap();

        let evicted = registry
            .check_provider_status(&ScriptedProbe(ProbeOutcome::Unreachable), &p)
            .await
            .unwrap();
        assert!(evicted);

        // Both of p's advertisements are gone, the other provider's remains
        assert_eq!(registry.get_provider(&service).await.unwrap().provider, other);
        assert!(registry.get_provider(&service2).await.is_none());
    }

    #[smol_potat::test]
    async fn reachable_probe_is_a_no_op() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);
        registry.register(support(&service, &p)).await.unwrap();

        let evicted = registry
            .check_provider_status(&ScriptedProbe(ProbeOutcome::Reachable), &p)
            .await
            .unwrap();
        assert!(!evicted);
        assert_eq!(registry.get_providers(&service).await.len(), 1);
    }

    #[smol_potat::test]
    async fn empty_registry_queries_are_not_errors() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");

        assert!(registry.get_provider(&service).await.is_none());
        assert!(registry.get_providers(&service).await.is_empty());
        assert!(registry.get_all_providers().await.is_empty());
        assert!(registry.get_service_info_by_id(1).await.is_none());
        assert!(registry.get_service_info_by_name("test").await.is_none());
    }

    #[smol_potat::test]
    async fn service_lookup_follows_registrations() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);
        registry.register(support(&service, &p)).await.unwrap();

        assert_eq!(registry.get_service_info_by_id(1).await.unwrap(), service);
        assert_eq!(
            registry.get_service_info_by_name("test").await.unwrap(),
            service
        );

        // Default policy drops the binding with the last advertisement
        registry.unregister(&service, &p).await.unwrap();
        assert!(registry.get_service_info_by_id(1).await.is_none());
        assert!(registry.get_service_info_by_name("test").await.is_none());
    }

    #[smol_potat::test]
    async fn retain_services_keeps_bindings_after_eviction() {
        let registry = Registry::open(Box::new(MemoryBackend::new()), true)
            .await
            .unwrap();
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);
        registry.register(support(&service, &p)).await.unwrap();
        registry.unregister_all(&p).await.unwrap();

        assert!(registry.get_provider(&service).await.is_none());
        assert_eq!(registry.get_service_info_by_id(1).await.unwrap(), service);

        // A contradicting identity is still rejected against the retained binding
        let err = registry
            .register(support(&ServiceInfo::new(1, "renamed"), &p))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceMismatch(_)));
    }

    #[smol_potat::test]
    async fn failed_durable_write_leaves_index_untouched() {
        let fail = std::sync::Arc::new(AtomicBool::new(false));
        let backend = Box::new(FlakyBackend::new(fail.clone()));
        let registry = Registry::open(backend, false).await.unwrap();
        let service = ServiceInfo::new(1, "test");
        let p = provider("tes1", 5);
        let other = provider("test2", 6);

        registry.register(support(&service, &p)).await.unwrap();

        fail.store(true, Ordering::Relaxed);

        assert!(registry.register(support(&service, &other)).await.is_err());
        assert!(registry.unregister(&service, &p).await.is_err());
        assert!(registry.unregister_all(&p).await.is_err());

        // Index still reflects exactly the one durable registration
        let all = registry.get_all_providers().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].provider, p);

        fail.store(false, Ordering::Relaxed);
        assert!(registry.unregister(&service, &p).await.unwrap());
        assert!(registry.get_all_providers().await.is_empty());
    }

    #[smol_potat::test]
    async fn reset_clears_index_and_store() {
        let registry = Registry::new().await;
        let service = ServiceInfo::new(1, "test");
        registry
            .register(support(&service, &provider("tes1", 5)))
            .await
            .unwrap();

        registry.reset().await.unwrap();
        assert!(registry.get_all_providers().await.is_empty());
        assert!(registry.get_service_info_by_id(1).await.is_none());

        // Sequence numbers restart cleanly after a reset
        registry
            .register(support(&service, &provider("tes1", 5)))
            .await
            .unwrap();
        assert_eq!(registry.get_all_providers().await.len(), 1);
    }

    #[smol_potat::test]
    async fn index_rebuilds_from_store_in_order() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let db_path = dir.path().join("registry.db");
        let service = ServiceInfo::new(1, "test");
        let (a, b, c) = (provider("tes1", 1), provider("test2", 2), provider("test3", 3));

        {
            let backend = Box::new(SledBackend::new(&db_path).await.unwrap());
            let registry = Registry::open(backend, false).await.unwrap();
            registry.register(support(&service, &a)).await.unwrap();
            registry.register(support(&service, &b)).await.unwrap();
            registry.register(support(&service, &c)).await.unwrap();
            registry.unregister(&service, &b).await.unwrap();
        }

        {
            let backend = Box::new(SledBackend::new(&db_path).await.unwrap());
            let registry = Registry::open(backend, false).await.unwrap();

            let providers = registry.get_providers(&service).await;
            assert_eq!(providers.len(), 2);
            assert_eq!(providers[0].provider, a);
            assert_eq!(providers[1].provider, c);
            assert_eq!(registry.get_service_info_by_name("test").await.unwrap(), service);

            // New registrations keep extending the recovered order
            let d = provider("tes4", 4);
            registry.register(support(&service, &d)).await.unwrap();
            let all = registry.get_all_providers().await;
            assert_eq!(all[2].provider, d);
        }
    }
}
