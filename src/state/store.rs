//! State store trait and backend selection.

use async_trait::async_trait;
use std::path::Path;

use crate::config::{StateBackend, StateConfig};
use crate::error::{ConfigError, Result};

use super::local::{LocalStateStore, STATE_DIR};
use super::lock::LockInfo;
use super::s3::S3StateStore;
use super::types::DeploymentState;

/// Persistent home of a [`DeploymentState`] snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state. Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Replaces the stored state.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Deletes the state and any lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Takes the lock. An empty holder gets a generated id.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Current lock, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if a live lock is held.
    async fn is_locked(&self) -> Result<bool>;

    /// Backend name for display.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        (**self).load().await
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Opens the configured backend.
///
/// A relative local path is resolved against `base_dir`, normally the
/// directory holding the configuration file.
///
/// # Errors
///
/// Returns an error if the S3 backend has no bucket.
pub async fn open_store(config: &StateConfig, base_dir: &Path) -> Result<Box<dyn StateStore>> {
    match config.backend {
        StateBackend::Local => {
            let store = match &config.path {
                Some(path) => LocalStateStore::with_state_path(base_dir.join(path)),
                None => LocalStateStore::with_base_dir(base_dir.join(STATE_DIR)),
            };
            Ok(Box::new(store))
        }
        StateBackend::S3 => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| {
                    ConfigError::validation("S3 backend requires a bucket", "state.bucket")
                })?;
            let store =
                S3StateStore::new(bucket, config.prefix.as_deref(), config.region.as_deref())
                    .await;
            Ok(Box::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_local_store_relative_path() {
        let temp = TempDir::new().expect("temp dir");
        let config = StateConfig {
            backend: StateBackend::Local,
            path: Some(String::from("state/dev.json")),
            ..StateConfig::default()
        };

        let store = open_store(&config, temp.path()).await.expect("open");
        assert_eq!(store.backend_type(), "local");

        store.save(&DeploymentState::new("p", "dev")).await.expect("save");
        assert!(temp.path().join("state/dev.json").exists());
    }

    #[tokio::test]
    async fn test_s3_requires_bucket() {
        let config = StateConfig {
            backend: StateBackend::S3,
            ..StateConfig::default()
        };
        assert!(open_store(&config, Path::new(".")).await.is_err());
    }
}
