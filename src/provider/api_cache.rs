//! Adapter for managed GraphQL API caches.
//!
//! A cache belongs to exactly one parent API and is addressed by that API's
//! id, so the cache's identifier is the `api_id` attribute. Changing
//! `api_id` or either encryption flag means replacing the cache.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Operation, ProviderError, Result};
use crate::resource::ResourceId;
use crate::schema::{
    AttributeDef, AttributeSet, AttributeType, Constraint, ResourceSchema, ValidAttributes,
};
use crate::transport::{
    ApiCache, ApiCacheTransport, ApiCacheType, ApiCachingBehavior, CreateApiCacheInput,
    UpdateApiCacheInput,
};

use super::adapter::{remote_error, ResourceAdapter};

/// Kind name for API caches.
pub const API_CACHE_KIND: &str = "api_cache";

/// Shortest allowed time to live, in seconds.
const MIN_TTL_SECS: i64 = 1;

/// Longest allowed time to live, in seconds.
const MAX_TTL_SECS: i64 = 3600;

/// Builds the API cache schema.
#[must_use]
pub fn api_cache_schema() -> ResourceSchema {
    ResourceSchema::new(API_CACHE_KIND, 1, "Managed cache in front of a GraphQL API")
        .with_identity("api_id")
        .with_attribute(
            AttributeDef::required("api_id", AttributeType::String)
                .force_new()
                .with_constraint(Constraint::Identifier)
                .describe("Id of the parent API; also the cache's identifier"),
        )
        .with_attribute(
            AttributeDef::required("api_caching_behavior", AttributeType::Enum)
                .with_constraint(Constraint::OneOf {
                    allowed: ApiCachingBehavior::TOKENS,
                    ignore_case: true,
                })
                .describe("Which requests are cached"),
        )
        .with_attribute(
            AttributeDef::optional("at_rest_encryption_enabled", AttributeType::Bool)
                .force_new()
                .with_default(false)
                .describe("Encrypt cached data at rest"),
        )
        .with_attribute(
            AttributeDef::optional("transit_encryption_enabled", AttributeType::Bool)
                .force_new()
                .with_default(false)
                .describe("Encrypt traffic between the gateway and the cache"),
        )
        .with_attribute(
            AttributeDef::required("ttl", AttributeType::Int)
                .with_constraint(Constraint::IntRange {
                    min: MIN_TTL_SECS,
                    max: MAX_TTL_SECS,
                })
                .describe("Time to live of cache entries, in seconds"),
        )
        .with_attribute(
            AttributeDef::required("type", AttributeType::Enum)
                .with_constraint(Constraint::OneOf {
                    allowed: ApiCacheType::TOKENS,
                    ignore_case: true,
                })
                .describe("Instance size class"),
        )
        .with_attribute(
            AttributeDef::computed("status", AttributeType::String)
                .describe("Lifecycle status reported by the service"),
        )
}

/// Remote adapter for API caches.
#[derive(Debug)]
pub struct ApiCacheAdapter<T: ?Sized> {
    schema: ResourceSchema,
    transport: Arc<T>,
}

impl<T: ApiCacheTransport + ?Sized> ApiCacheAdapter<T> {
    /// Creates an adapter over a transport.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            schema: api_cache_schema(),
            transport,
        }
    }

    fn invalid(attribute: &str, message: impl Into<String>) -> ProviderError {
        ProviderError::InvalidAttribute {
            kind: API_CACHE_KIND.to_string(),
            attribute: attribute.to_string(),
            message: message.into(),
        }
    }

    fn parse<V: FromStr<Err = String>>(set: &AttributeSet, name: &str) -> Result<Option<V>> {
        set.get(name)
            .map(|value| {
                value
                    .as_str()
                    .ok_or_else(|| Self::invalid(name, "expected a string"))
                    .and_then(|s| V::from_str(s).map_err(|e| Self::invalid(name, e)))
            })
            .transpose()
            .map_err(Into::into)
    }

    fn create_input(attributes: &ValidAttributes) -> Result<CreateApiCacheInput> {
        let api_id = attributes
            .get_str("api_id")
            .ok_or_else(|| Self::invalid("api_id", "missing"))?;
        let api_caching_behavior = Self::parse(attributes, "api_caching_behavior")?
            .ok_or_else(|| Self::invalid("api_caching_behavior", "missing"))?;
        let cache_type =
            Self::parse(attributes, "type")?.ok_or_else(|| Self::invalid("type", "missing"))?;
        let ttl = attributes.get_int("ttl").ok_or_else(|| Self::invalid("ttl", "missing"))?;

        Ok(CreateApiCacheInput {
            api_id: api_id.to_string(),
            api_caching_behavior,
            ttl,
            cache_type,
            at_rest_encryption_enabled: attributes.get_bool("at_rest_encryption_enabled"),
            transit_encryption_enabled: attributes.get_bool("transit_encryption_enabled"),
        })
    }

    fn update_input(id: &ResourceId, changes: &AttributeSet) -> Result<UpdateApiCacheInput> {
        Ok(UpdateApiCacheInput {
            api_id: id.to_string(),
            api_caching_behavior: Self::parse(changes, "api_caching_behavior")?,
            ttl: changes.get_int("ttl"),
            cache_type: Self::parse(changes, "type")?,
        })
    }

    fn flatten(id: &ResourceId, cache: &ApiCache) -> AttributeSet {
        let mut set = AttributeSet::new()
            .with("api_id", id.as_str())
            .with("api_caching_behavior", cache.api_caching_behavior.as_str())
            .with("ttl", cache.ttl)
            .with("type", cache.cache_type.as_str())
            .with(
                "at_rest_encryption_enabled",
                cache.at_rest_encryption_enabled.unwrap_or(false),
            )
            .with(
                "transit_encryption_enabled",
                cache.transit_encryption_enabled.unwrap_or(false),
            );
        if let Some(status) = cache.status {
            set.insert("status", status.as_str());
        }
        set
    }
}

#[async_trait]
impl<T: ApiCacheTransport + ?Sized + 'static> ResourceAdapter for ApiCacheAdapter<T> {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    async fn create(&self, attributes: &ValidAttributes) -> Result<ResourceId> {
        let input = Self::create_input(attributes)?;
        let id = ResourceId::new(input.api_id.clone());
        debug!("Creating API cache for {id}");

        self.transport
            .create_api_cache(input)
            .await
            .map_err(|e| remote_error(API_CACHE_KIND, id.as_str(), Operation::Create, e))?;

        info!("Created API cache {id}");
        Ok(id)
    }

    async fn read(&self, id: &ResourceId) -> Result<Option<AttributeSet>> {
        match self.transport.get_api_cache(id.as_str()).await {
            Ok(cache) => Ok(Some(Self::flatten(id, &cache))),
            Err(e) if e.is_not_found() => {
                warn!("API cache {id} not found, removing from state");
                Ok(None)
            }
            Err(e) => Err(remote_error(API_CACHE_KIND, id.as_str(), Operation::Read, e)),
        }
    }

    async fn update(&self, id: &ResourceId, changes: &AttributeSet) -> Result<()> {
        let input = Self::update_input(id, changes)?;
        if input.is_empty() {
            debug!("No in-place changes for API cache {id}");
            return Ok(());
        }

        self.transport
            .update_api_cache(input)
            .await
            .map_err(|e| remote_error(API_CACHE_KIND, id.as_str(), Operation::Update, e))?;

        info!("Updated API cache {id}");
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        match self.transport.delete_api_cache(id.as_str()).await {
            Ok(()) => {
                info!("Deleted API cache {id}");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("API cache {id} already gone");
                Ok(())
            }
            Err(e) => Err(remote_error(API_CACHE_KIND, id.as_str(), Operation::Delete, e)),
        }
    }
}
