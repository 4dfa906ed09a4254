//! Configuration hashing for change detection.
//!
//! The hash is recorded in state after each run so `status` can tell whether
//! the configuration changed since the last apply.

use sha2::{Digest, Sha256};

use crate::schema::AttributeSet;

use super::spec::{DeployConfig, ResourceConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the desired state.
    ///
    /// Resource order in the file does not matter. Engine and transport
    /// tuning are left out since they do not change what gets deployed.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        let mut resources: Vec<&ResourceConfig> = config.resources.iter().collect();
        resources.sort_by_key(|r| r.addr());
        for resource in resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        if let Some(guardrails) = &config.guardrails {
            hasher.update([u8::from(guardrails.prevent_destroy)]);
            if let Some(max_deletes) = guardrails.max_deletes {
                hasher.update((max_deletes as u64).to_be_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource configuration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.kind.as_bytes());
        hasher.update([0]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.hash_attributes(&resource.attributes).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an attribute set.
    ///
    /// Attribute sets are ordered maps, so equal sets always hash equally.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &AttributeSet) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in attributes.iter() {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(value.type_name().as_bytes());
            hasher.update(value.to_string().as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    fn resource(name: &str, ttl: i64) -> ResourceConfig {
        ResourceConfig {
            kind: String::from("api_cache"),
            name: name.to_string(),
            attributes: AttributeSet::new().with("api_id", name).with("ttl", ttl),
        }
    }

    fn config(resources: Vec<ResourceConfig>) -> DeployConfig {
        DeployConfig {
            project: ProjectConfig {
                name: String::from("storefront"),
                environment: String::from("dev"),
            },
            state: Default::default(),
            engine: Default::default(),
            transport: Default::default(),
            guardrails: None,
            resources,
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let cfg = config(vec![resource("a", 60)]);
        assert_eq!(hasher.hash_config(&cfg), hasher.hash_config(&cfg));
    }

    #[test]
    fn test_resource_order_does_not_matter() {
        let hasher = ConfigHasher::new();
        let one = config(vec![resource("a", 60), resource("b", 60)]);
        let two = config(vec![resource("b", 60), resource("a", 60)]);
        assert_eq!(hasher.hash_config(&one), hasher.hash_config(&two));
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let one = config(vec![resource("a", 60)]);
        let two = config(vec![resource("a", 61)]);
        assert_ne!(hasher.hash_config(&one), hasher.hash_config(&two));
    }

    #[test]
    fn test_value_type_is_part_of_hash() {
        let hasher = ConfigHasher::new();
        let int = AttributeSet::new().with("ttl", 60);
        let text = AttributeSet::new().with("ttl", "60");
        assert_ne!(hasher.hash_attributes(&int), hasher.hash_attributes(&text));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
