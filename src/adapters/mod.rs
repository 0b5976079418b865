//! Adapter registry
//!
//! Resource and storage adapters are registered once at process start and
//! resolved by name from an immutable registry. Hardware profiles and volumes
//! reference adapters by these names.

pub mod default_storage;
pub mod testing;

pub use default_storage::DefaultStorageAdapter;

use crate::domain::ports::{ResourceAdapter, StorageAdapter};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The storage adapter name used when a volume has no backend of its own
pub const DEFAULT_STORAGE_ADAPTER: &str = "default";

/// Immutable name-keyed registry of provisioning backends
#[derive(Default)]
pub struct AdapterRegistry {
    resource: BTreeMap<String, Arc<dyn ResourceAdapter>>,
    storage: BTreeMap<String, Arc<dyn StorageAdapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    pub fn resource_adapter(&self, name: &str) -> Result<Arc<dyn ResourceAdapter>> {
        self.resource
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceAdapterNotFound { name: name.to_string() })
    }

    pub fn storage_adapter(&self, name: &str) -> Result<Arc<dyn StorageAdapter>> {
        self.storage
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StorageAdapterNotFound { name: name.to_string() })
    }

    pub fn resource_adapter_names(&self) -> Vec<String> {
        self.resource.keys().cloned().collect()
    }
}

/// Builder populated from configuration at startup
#[derive(Default)]
pub struct AdapterRegistryBuilder {
    resource: BTreeMap<String, Arc<dyn ResourceAdapter>>,
    storage: BTreeMap<String, Arc<dyn StorageAdapter>>,
}

impl AdapterRegistryBuilder {
    pub fn register_resource(mut self, adapter: Arc<dyn ResourceAdapter>) -> Self {
        self.resource.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn register_storage(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.storage.insert(adapter.name().to_string(), adapter);
        self
    }

    /// Finish the registry, always including the built-in default storage
    /// adapter unless one was registered under that name.
    pub fn build(mut self) -> Arc<AdapterRegistry> {
        self.storage
            .entry(DEFAULT_STORAGE_ADAPTER.to_string())
            .or_insert_with(|| Arc::new(DefaultStorageAdapter::new()));

        Arc::new(AdapterRegistry {
            resource: self.resource,
            storage: self.storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_storage_adapter_registered() {
        let registry = AdapterRegistry::builder().build();
        assert!(registry.storage_adapter(DEFAULT_STORAGE_ADAPTER).is_ok());
    }

    #[test]
    fn test_unknown_adapter_is_not_found() {
        let registry = AdapterRegistry::builder().build();
        assert_matches!(
            registry.resource_adapter("aws"),
            Err(Error::ResourceAdapterNotFound { .. })
        );
    }
}
