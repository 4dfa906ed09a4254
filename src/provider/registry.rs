//! Kind to adapter registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::ResourceConfig;
use crate::error::{ConfigError, DeployError, ProviderError, Result};
use crate::resource::{DesiredResource, ResourceAddr};
use crate::schema::ResourceSchema;

use super::adapter::ResourceAdapter;
use super::api_cache::api_cache_schema;

/// Schemas of every kind this build knows about.
#[must_use]
pub fn builtin_schemas() -> Vec<ResourceSchema> {
    vec![api_cache_schema()]
}

/// Registered adapters, keyed by kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn ResourceAdapter>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ResourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Registers an adapter, returning the registry.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ResourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks up the adapter for a kind.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter is registered for the kind.
    pub fn adapter(&self, kind: &str) -> Result<Arc<dyn ResourceAdapter>> {
        self.adapters.get(kind).cloned().ok_or_else(|| {
            DeployError::from(ProviderError::UnknownKind {
                kind: kind.to_string(),
            })
        })
    }

    /// Looks up the schema for a kind.
    #[must_use]
    pub fn get_schema(&self, kind: &str) -> Option<&ResourceSchema> {
        self.adapters.get(kind).map(|adapter| adapter.schema())
    }

    /// Registered kinds in name order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }

    /// Validates configured resources against their schemas.
    ///
    /// Validation errors from every resource are checked in order; the first
    /// invalid resource is reported with its address. Repeated addresses and
    /// two resources of the same kind that would create the same remote
    /// identifier are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind, invalid attributes, a repeated
    /// address, or a shared identifier.
    pub fn desired_resources(&self, resources: &[ResourceConfig]) -> Result<Vec<DesiredResource>> {
        let mut owners: HashMap<(&'static str, String), ResourceAddr> = HashMap::new();
        let mut seen: HashSet<ResourceAddr> = HashSet::new();
        let mut desired = Vec::with_capacity(resources.len());

        for resource in resources {
            let adapter = self.adapter(&resource.kind)?;
            let addr = ResourceAddr::new(resource.kind.as_str(), resource.name.as_str());
            if !seen.insert(addr.clone()) {
                return Err(ConfigError::DuplicateName {
                    resource_type: resource.kind.clone(),
                    name: resource.name.clone(),
                }
                .into());
            }
            let attributes = adapter
                .schema()
                .validate(&resource.attributes)
                .map_err(|e| e.for_resource(addr.to_string()))?;

            if let Some(id) = adapter.planned_id(&attributes) {
                let key = (adapter.kind(), id.to_string());
                if let Some(first) = owners.get(&key) {
                    return Err(ConfigError::DuplicateOwner {
                        kind: adapter.kind().to_string(),
                        id: id.to_string(),
                        first: first.to_string(),
                        second: addr.to_string(),
                    }
                    .into());
                }
                owners.insert(key, addr.clone());
            }

            desired.push(DesiredResource { addr, attributes });
        }

        Ok(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ApiCacheAdapter;
    use crate::schema::AttributeSet;
    use crate::transport::InMemoryTransport;

    fn registry() -> ProviderRegistry {
        let transport = Arc::new(InMemoryTransport::new());
        ProviderRegistry::new().with(Arc::new(ApiCacheAdapter::new(transport)))
    }

    fn cache(name: &str, api_id: &str) -> ResourceConfig {
        ResourceConfig {
            kind: String::from("api_cache"),
            name: name.to_string(),
            attributes: AttributeSet::new()
                .with("api_id", api_id)
                .with("api_caching_behavior", "FULL_REQUEST_CACHING")
                .with("ttl", 60)
                .with("type", "SMALL"),
        }
    }

    #[test]
    fn test_schema_lookup() {
        let registry = registry();
        assert_eq!(registry.kinds(), vec!["api_cache"]);
        assert!(registry.get_schema("api_cache").is_some());
        assert!(registry.get_schema("bucket").is_none());
        assert!(registry.adapter("bucket").is_err());
    }

    #[test]
    fn test_desired_resources_validates() {
        let registry = registry();
        let desired = registry
            .desired_resources(&[cache("a", "api-1"), cache("b", "api-2")])
            .expect("valid");
        assert_eq!(desired.len(), 2);
        assert_eq!(desired[0].addr.to_string(), "api_cache.a");

        let mut bad = cache("c", "api-3");
        bad.attributes.insert("ttl", 0);
        let err = registry.desired_resources(&[bad]).expect_err("invalid ttl");
        assert!(err.to_string().contains("api_cache.c"));
    }

    #[test]
    fn test_shared_api_id_is_rejected() {
        let err = registry()
            .desired_resources(&[cache("a", "api-1"), cache("b", "api-1")])
            .expect_err("duplicate owner");
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::DuplicateOwner { .. })
        ));
    }

    #[test]
    fn test_repeated_address_is_rejected() {
        let err = registry()
            .desired_resources(&[cache("a", "api-1"), cache("a", "api-2")])
            .expect_err("duplicate name");
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::DuplicateName { .. })
        ));
    }
}
