//! Control-plane transport for API caches.
//!
//! The transport owns the wire: request encoding, HTTP status and error-body
//! classification into [`RemoteError`], and retries of transient failures for
//! every call except create.
//! Adapters above it only see typed requests and typed errors.

mod client;
mod memory;
mod types;

pub use client::HttpTransport;
pub use memory::{InMemoryTransport, TransportCall};
pub use types::{
    ApiCache, ApiCacheStatus, ApiCacheType, ApiCachingBehavior, CreateApiCacheInput,
    UpdateApiCacheInput,
};

use async_trait::async_trait;

use crate::error::RemoteError;

/// Result type for transport calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The four control-plane calls for API caches.
///
/// Every cache is addressed by its parent API id; an API has at most one
/// cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiCacheTransport: Send + Sync {
    /// Creates the cache for an API.
    async fn create_api_cache(&self, input: CreateApiCacheInput) -> RemoteResult<ApiCache>;

    /// Fetches the cache for an API.
    async fn get_api_cache(&self, api_id: &str) -> RemoteResult<ApiCache>;

    /// Changes the mutable settings of a cache.
    async fn update_api_cache(&self, input: UpdateApiCacheInput) -> RemoteResult<ApiCache>;

    /// Deletes the cache for an API.
    async fn delete_api_cache(&self, api_id: &str) -> RemoteResult<()>;
}
