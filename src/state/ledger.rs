//! In-process view of the committed state.
//!
//! The ledger is shared by every task of a reconciliation run. Records are
//! replaced whole behind an `Arc`, so readers never see a half-written
//! record. Remote calls for one identifier are serialized through
//! [`StateLedger::lock_instance`], and saves go through a single flush lock
//! so a later save never carries an older snapshot.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::resource::{ResourceAddr, ResourceId};

use super::store::StateStore;
use super::types::{
    DeploymentHistoryEntry, DeploymentState, ResourceRecord, MAX_HISTORY, STATE_VERSION,
};

#[derive(Debug)]
struct LedgerMeta {
    project: String,
    environment: String,
    config_hash: String,
    serial: u64,
    history: Vec<DeploymentHistoryEntry>,
}

/// Shared, concurrently accessible state.
#[derive(Debug)]
pub struct StateLedger {
    records: RwLock<BTreeMap<ResourceAddr, Arc<ResourceRecord>>>,
    meta: Mutex<LedgerMeta>,
    instance_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    flush_lock: AsyncMutex<()>,
}

impl StateLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self::build(DeploymentState::new(project, environment))
    }

    /// Creates a ledger from a loaded snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot was written by an incompatible
    /// version.
    pub fn from_state(state: DeploymentState) -> Result<Self> {
        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }
        Ok(Self::build(state))
    }

    fn build(state: DeploymentState) -> Self {
        let records = state
            .resources
            .into_iter()
            .map(|(addr, record)| (addr, Arc::new(record)))
            .collect();

        Self {
            records: RwLock::new(records),
            meta: Mutex::new(LedgerMeta {
                project: state.project,
                environment: state.environment,
                config_hash: state.config_hash,
                serial: state.serial,
                history: state.history,
            }),
            instance_locks: Mutex::new(HashMap::new()),
            flush_lock: AsyncMutex::new(()),
        }
    }

    fn meta(&self) -> std::sync::MutexGuard<'_, LedgerMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the committed record for an address.
    #[must_use]
    pub fn get(&self, addr: &ResourceAddr) -> Option<Arc<ResourceRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
    }

    /// All committed records in address order.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<ResourceRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the record tracking a remote identifier of a kind.
    #[must_use]
    pub fn find_by_id(&self, kind: &str, id: &ResourceId) -> Option<Arc<ResourceRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|r| r.addr.kind == kind && &r.id == id)
            .cloned()
    }

    /// Replaces the record for its address.
    pub fn commit(&self, record: ResourceRecord) {
        debug!("Committing {} ({})", record.addr, record.id);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.addr.clone(), Arc::new(record));
    }

    /// Stops tracking an address.
    pub fn forget(&self, addr: &ResourceAddr) -> Option<Arc<ResourceRecord>> {
        debug!("Forgetting {addr}");
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr)
    }

    /// Waits for exclusive use of an identifier.
    ///
    /// The guard must be held for the whole remote call sequence on that
    /// identifier.
    pub async fn lock_instance(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.instance_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.to_string())
                .or_default(),
        );
        lock.lock_owned().await
    }

    /// Appends a run to the history.
    pub fn record_history(&self, entry: DeploymentHistoryEntry) {
        let mut meta = self.meta();
        meta.history.push(entry);
        if meta.history.len() > MAX_HISTORY {
            let excess = meta.history.len() - MAX_HISTORY;
            meta.history.drain(..excess);
        }
    }

    /// Sets the applied configuration hash.
    pub fn set_config_hash(&self, hash: &str) {
        self.meta().config_hash = hash.to_string();
    }

    /// Applied configuration hash.
    #[must_use]
    pub fn config_hash(&self) -> String {
        self.meta().config_hash.clone()
    }

    /// Last saved serial.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.meta().serial
    }

    /// Builds a snapshot of the committed view.
    #[must_use]
    pub fn snapshot(&self) -> DeploymentState {
        let resources = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(addr, record)| (addr.clone(), ResourceRecord::clone(record)))
            .collect();

        let meta = self.meta();
        let mut state = DeploymentState::new(&meta.project, &meta.environment);
        state.config_hash.clone_from(&meta.config_hash);
        state.serial = meta.serial;
        state.resources = resources;
        for entry in &meta.history {
            state.add_history(entry.clone());
        }
        state.last_updated = Utc::now();
        state
    }

    /// Saves a snapshot through a store and returns its serial.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to save.
    pub async fn flush<S: StateStore + ?Sized>(&self, store: &S) -> Result<u64> {
        let _flush = self.flush_lock.lock().await;

        let serial = {
            let mut meta = self.meta();
            meta.serial += 1;
            meta.serial
        };
        let snapshot = self.snapshot();
        store.save(&snapshot).await?;

        debug!("Flushed state serial {serial} ({} resources)", snapshot.resources.len());
        Ok(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeSet;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;
    use tokio_test::{assert_pending, assert_ready, task};

    fn record(name: &str, id: &str) -> ResourceRecord {
        ResourceRecord::new(
            ResourceAddr::new("api_cache", name),
            ResourceId::new(id),
            AttributeSet::new().with("ttl", 60),
        )
    }

    #[test]
    fn test_commit_get_forget() {
        let ledger = StateLedger::new("p", "dev");
        ledger.commit(record("a", "api-1"));

        let addr = ResourceAddr::new("api_cache", "a");
        assert_eq!(ledger.get(&addr).map(|r| r.id.clone()), Some(ResourceId::new("api-1")));
        assert!(ledger.find_by_id("api_cache", &ResourceId::new("api-1")).is_some());
        assert!(ledger.find_by_id("other", &ResourceId::new("api-1")).is_none());

        assert!(ledger.forget(&addr).is_some());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_same_key_waits_for_release() {
        let ledger = StateLedger::new("p", "dev");
        let first = tokio_test::block_on(ledger.lock_instance("api-1"));

        let mut second = task::spawn(ledger.lock_instance("api-1"));
        assert_pending!(second.poll());

        let mut other = task::spawn(ledger.lock_instance("api-2"));
        let _other_guard = assert_ready!(other.poll());

        drop(first);
        assert!(second.is_woken());
        let _second_guard = assert_ready!(second.poll());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut state = DeploymentState::new("p", "dev");
        state.version = String::from("0.1");
        assert!(StateLedger::from_state(state).is_err());
    }

    #[tokio::test]
    async fn test_flush_increments_serial() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let ledger = StateLedger::new("p", "dev");
        ledger.commit(record("a", "api-1"));

        assert_eq!(ledger.flush(&store).await.expect("flush"), 1);
        assert_eq!(ledger.flush(&store).await.expect("flush"), 2);

        let saved = store.load().await.expect("load").expect("saved");
        assert_eq!(saved.serial, 2);
        assert_eq!(saved.resources.len(), 1);

        let reloaded = StateLedger::from_state(saved).expect("compatible");
        assert_eq!(reloaded.serial(), 2);
        assert_eq!(reloaded.len(), 1);
    }
}
