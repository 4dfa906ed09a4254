//! S3-based state storage backend.
//!
//! State and lock are two JSON objects under an optional key prefix, so a
//! bucket can hold the state of several projects.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::DeploymentState;

/// State object name.
const STATE_KEY: &str = "state.json";

/// Lock object name.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Turns `a/b/`, `/a/b` or `a/b` into `a/b/`; empty stays empty.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

fn decode<T: DeserializeOwned>(content: &str, what: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse {what}: {e}"),
        }
        .into()
    })
}

impl S3StateStore {
    /// Creates a store using the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = match region {
            Some(region) => {
                aws_config::from_env()
                    .region(aws_config::Region::new(region.to_string()))
                    .load()
                    .await
            }
            None => aws_config::load_from_env().await,
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                let message = format!("get s3://{}/{key}: {service_err}", self.bucket);
                return Err(StateError::s3(message).into());
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| {
                StateError::Corrupted {
                    message: format!("Invalid UTF-8 in S3 object: {e}"),
                }
                .into()
            })
    }

    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("put s3://{}/{key}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("delete s3://{}/{key}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match self.get_object(&self.key(LOCK_KEY)).await? {
            Some(content) => decode(&content, "lock").map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(content) => {
                let state: DeploymentState = decode(&content, "state")?;
                debug!(
                    "Loaded state serial {} for {}/{}",
                    state.serial, state.project, state.environment
                );
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        let key = self.key(STATE_KEY);
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.put_object(&key, content).await?;
        debug!("Saved state serial {} to s3://{}/{key}", state.serial, self.bucket);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting state from s3://{}/{}", self.bucket, self.key(STATE_KEY));
        self.delete_object(&self.key(STATE_KEY)).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        let key = self.key(STATE_KEY);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    let message = format!("head s3://{}/{key}: {service_err}", self.bucket);
                    Err(StateError::s3(message).into())
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id);

        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.put_object(&self.key(LOCK_KEY), content).await?;

        info!(
            "Acquired state lock {} (expires in {LOCK_EXPIRY_SECS}s)",
            lock_info.lock_id
        );
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_lock().await?.is_some_and(|lock| !lock.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("")), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("team/prod")), "team/prod/");
        assert_eq!(normalize_prefix(Some("/team/prod/")), "team/prod/");
    }

    #[test]
    fn test_keys_use_prefix() {
        let store = S3StateStore::with_client(offline_client(), "bucket", Some("caches/dev"));
        assert_eq!(store.key(STATE_KEY), "caches/dev/state.json");
        assert_eq!(store.key(LOCK_KEY), "caches/dev/state.lock");
        assert_eq!(store.backend_type(), "s3");
    }

    #[test]
    fn test_decode_reports_corruption() {
        let err = decode::<LockInfo>("nope", "lock").expect_err("invalid");
        assert!(err.to_string().contains("Failed to parse lock"));
    }
}
