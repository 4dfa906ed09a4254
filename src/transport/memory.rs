//! In-memory transport.
//!
//! Keeps caches in a map, counts calls per operation, and can be told to fail
//! the next call of a given kind. The engine's tests run against it.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::RemoteError;

use super::types::{ApiCache, ApiCacheStatus, CreateApiCacheInput, UpdateApiCacheInput};
use super::{ApiCacheTransport, RemoteResult};

/// A transport call kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCall {
    /// `create_api_cache`.
    Create,
    /// `get_api_cache`.
    Get,
    /// `update_api_cache`.
    Update,
    /// `delete_api_cache`.
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    caches: HashMap<String, ApiCache>,
    calls: HashMap<TransportCall, usize>,
    failures: HashMap<TransportCall, VecDeque<RemoteError>>,
    updates: Vec<UpdateApiCacheInput>,
    in_flight: HashMap<String, usize>,
    max_overlap: usize,
}

/// Thread-safe fake control plane.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl InMemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call wait before answering.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a cache as if it already existed remotely.
    pub fn insert(&self, api_id: &str, cache: ApiCache) {
        self.lock().caches.insert(api_id.to_string(), cache);
    }

    /// Removes a cache out of band, simulating drift.
    pub fn remove(&self, api_id: &str) -> Option<ApiCache> {
        self.lock().caches.remove(api_id)
    }

    /// Returns the stored cache for an API.
    #[must_use]
    pub fn cache(&self, api_id: &str) -> Option<ApiCache> {
        self.lock().caches.get(api_id).cloned()
    }

    /// Number of caches held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().caches.len()
    }

    /// Returns true if no cache is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().caches.is_empty()
    }

    /// Queues an error for the next call of the given kind.
    pub fn fail_next(&self, call: TransportCall, error: RemoteError) {
        self.lock().failures.entry(call).or_default().push_back(error);
    }

    /// Number of calls of the given kind so far.
    #[must_use]
    pub fn calls(&self, call: TransportCall) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Total number of calls so far.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Every update request received, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<UpdateApiCacheInput> {
        self.lock().updates.clone()
    }

    /// Highest number of calls seen in flight at once for a single API id.
    #[must_use]
    pub fn max_overlap(&self) -> usize {
        self.lock().max_overlap
    }

    /// Records the call and pops a queued failure, if any.
    fn begin(&self, call: TransportCall, api_id: &str) -> RemoteResult<()> {
        let mut inner = self.lock();
        *inner.calls.entry(call).or_insert(0) += 1;

        let depth = {
            let depth = inner.in_flight.entry(api_id.to_string()).or_insert(0);
            *depth += 1;
            *depth
        };
        inner.max_overlap = inner.max_overlap.max(depth);

        match inner.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(error) => {
                Self::finish_locked(&mut inner, api_id);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn finish(&self, api_id: &str) {
        Self::finish_locked(&mut self.lock(), api_id);
    }

    fn finish_locked(inner: &mut Inner, api_id: &str) {
        if let Some(depth) = inner.in_flight.get_mut(api_id) {
            *depth = depth.saturating_sub(1);
        }
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ApiCacheTransport for InMemoryTransport {
    async fn create_api_cache(&self, input: CreateApiCacheInput) -> RemoteResult<ApiCache> {
        self.begin(TransportCall::Create, &input.api_id)?;
        self.pause().await;

        let result = {
            let mut inner = self.lock();
            if inner.caches.contains_key(&input.api_id) {
                Err(RemoteError::bad_request(format!(
                    "a cache already exists for API {}",
                    input.api_id
                )))
            } else {
                let cache = ApiCache {
                    api_caching_behavior: input.api_caching_behavior,
                    ttl: input.ttl,
                    cache_type: input.cache_type,
                    at_rest_encryption_enabled: input.at_rest_encryption_enabled,
                    transit_encryption_enabled: input.transit_encryption_enabled,
                    status: Some(ApiCacheStatus::Available),
                };
                inner.caches.insert(input.api_id.clone(), cache.clone());
                Ok(cache)
            }
        };

        self.finish(&input.api_id);
        result
    }

    async fn get_api_cache(&self, api_id: &str) -> RemoteResult<ApiCache> {
        self.begin(TransportCall::Get, api_id)?;
        self.pause().await;

        let result = self
            .lock()
            .caches
            .get(api_id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(api_id));

        self.finish(api_id);
        result
    }

    async fn update_api_cache(&self, input: UpdateApiCacheInput) -> RemoteResult<ApiCache> {
        self.begin(TransportCall::Update, &input.api_id)?;
        self.pause().await;

        let result = {
            let mut inner = self.lock();
            inner.updates.push(input.clone());
            match inner.caches.get_mut(&input.api_id) {
                Some(cache) => {
                    if let Some(behavior) = input.api_caching_behavior {
                        cache.api_caching_behavior = behavior;
                    }
                    if let Some(ttl) = input.ttl {
                        cache.ttl = ttl;
                    }
                    if let Some(cache_type) = input.cache_type {
                        cache.cache_type = cache_type;
                    }
                    Ok(cache.clone())
                }
                None => Err(RemoteError::not_found(input.api_id.as_str())),
            }
        };

        self.finish(&input.api_id);
        result
    }

    async fn delete_api_cache(&self, api_id: &str) -> RemoteResult<()> {
        self.begin(TransportCall::Delete, api_id)?;
        self.pause().await;

        let result = self
            .lock()
            .caches
            .remove(api_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(api_id));

        self.finish(api_id);
        result
    }
}
