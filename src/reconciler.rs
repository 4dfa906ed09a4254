//! Reconciler for maintaining desired state.
//!
//! This module implements the reconciliation loop: load the stored state,
//! validate the desired resources, refresh tracked instances, then diff,
//! plan and execute until the remote side matches the configuration.
//!
//! Every operation that writes state runs under the store's lock.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::{ReconcileError, Result};
use crate::planner::{
    ActionStatus, ActionType, CancellationFlag, DeploymentPlan, DiffEngine, ExecutionResult,
    PlanExecutor,
};
use crate::provider::ProviderRegistry;
use crate::resource::{DesiredResource, ResourceAddr, ResourceId};
use crate::schema::{AttributeSet, AttributeValue, ResourceSchema};
use crate::state::{
    generate_holder_id, DeploymentHistoryEntry, DeploymentOperation, LockInfo, ResourceRecord,
    StateLedger, StateStore,
};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// Configuration.
    config: &'a DeployConfig,
    /// State store.
    store: &'a S,
    /// Adapters by kind.
    registry: Arc<ProviderRegistry>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Set to stop starting new actions.
    cancel: CancellationFlag,
    /// Lock holder id.
    holder: String,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// Identifier of this run, as recorded in history.
    pub run_id: Uuid,
    /// Whether reconciliation succeeded.
    pub success: bool,
    /// Passes run.
    pub attempts: u32,
    /// Number of instances created.
    pub created: usize,
    /// Number of instances updated in place.
    pub updated: usize,
    /// Number of instances replaced.
    pub replaced: usize,
    /// Number of instances deleted.
    pub deleted: usize,
    /// Number of instances unchanged.
    pub unchanged: usize,
    /// Errors encountered.
    pub errors: Vec<String>,
    /// Serial of the saved state.
    pub serial: u64,
}

/// How a tracked instance differs from what was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftKind {
    /// The instance no longer exists remotely.
    Vanished,
    /// Attributes changed outside this tool.
    Changed {
        /// Changed attributes.
        fields: Vec<FieldDrift>,
    },
}

/// One attribute that changed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDrift {
    /// Attribute name.
    pub field: String,
    /// Value in state.
    pub stored: Option<AttributeValue>,
    /// Value read remotely.
    pub actual: Option<AttributeValue>,
}

/// Drift of one tracked instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDrift {
    /// Resource address.
    pub addr: ResourceAddr,
    /// Remote identifier.
    pub id: ResourceId,
    /// What drifted.
    pub drift: DriftKind,
}

/// Result of re-reading every tracked instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Instances read.
    pub refreshed: usize,
    /// Instances that drifted, including vanished ones.
    pub drifted: Vec<ResourceDrift>,
}

/// Report of drift detection.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Tracked instances changed or removed remotely.
    pub drifted: Vec<ResourceDrift>,
    /// Addresses an apply would act on after refreshing.
    pub pending: Vec<String>,
    /// Number of tracked instances.
    pub total_tracked: usize,
}

/// Summary of the stored state against the configuration.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Qualified project name.
    pub project: String,
    /// State backend.
    pub backend: &'static str,
    /// Serial of the stored state, if any.
    pub serial: Option<u64>,
    /// Tracked instances.
    pub resources: Vec<ResourceRecord>,
    /// Configured addresses not tracked yet.
    pub untracked: Vec<String>,
    /// Tracked addresses no longer configured.
    pub orphaned: Vec<String>,
    /// Whether the configuration changed since the last successful apply.
    pub config_changed: bool,
    /// Current lock, if any.
    pub lock: Option<LockInfo>,
    /// Most recent run.
    pub last_run: Option<DeploymentHistoryEntry>,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(config: &'a DeployConfig, store: &'a S, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            cancel: CancellationFlag::new(),
            holder: generate_holder_id(),
        }
    }

    /// Uses a shared cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Performs a full reconciliation.
    ///
    /// Failed actions are reported in the result. Errors are returned for
    /// invalid configuration, a failed refresh, guardrail violations,
    /// cancellation, and state store failures.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation cannot run to completion.
    pub async fn reconcile(&self) -> Result<ReconciliationResult> {
        info!("Starting reconciliation for {}", self.config.qualified_name());
        self.locked(self.reconcile_locked()).await
    }

    async fn reconcile_locked(&self) -> Result<ReconciliationResult> {
        let run_id = Uuid::new_v4();
        let config_hash = self.hasher.hash_config(self.config);
        let ledger = self.load_ledger().await?;

        let desired = self.registry.desired_resources(&self.config.resources)?;
        debug!("{} desired resource(s) validated", desired.len());

        let outcome = self.converge(&ledger, &desired, &config_hash, run_id).await;

        let entry = DeploymentHistoryEntry::new(
            DeploymentOperation::Apply,
            run_id,
            &config_hash,
            self.config.resource_addrs().iter().map(ToString::to_string).collect(),
        );
        let entry = match &outcome {
            Ok(result) if result.success => {
                ledger.set_config_hash(&config_hash);
                entry
            }
            Ok(result) => entry.failed(result.errors.join("; ")),
            Err(e) => entry.failed(e.to_string()),
        };
        ledger.record_history(entry);
        let serial = ledger.flush(self.store).await?;

        outcome.map(|result| ReconciliationResult { serial, ..result })
    }

    /// Refresh then diff, plan and execute, up to `max_attempts` passes.
    async fn converge(
        &self,
        ledger: &Arc<StateLedger>,
        desired: &[DesiredResource],
        config_hash: &str,
        run_id: Uuid,
    ) -> Result<ReconciliationResult> {
        if self.config.engine.refresh {
            self.refresh_ledger(ledger).await?;
        }

        let engine = &self.config.engine;
        let guardrails = self.config.guardrails();
        let executor = PlanExecutor::new(Arc::clone(&self.registry), Arc::clone(ledger))
            .with_parallelism(engine.parallelism)
            .with_fail_fast(engine.fail_fast)
            .with_cancellation(self.cancel.clone());

        let mut result = ReconciliationResult::new(run_id);

        for attempt in 1..=engine.max_attempts.max(1) {
            debug!("Reconciliation attempt {attempt}/{}", engine.max_attempts);
            result.attempts = attempt;

            let diff = self
                .diff_engine
                .compute_diff(desired, &ledger.records(), &self.registry)?;
            info!(
                "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
                diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
            );
            result.unchanged = diff.unchanged;

            if !diff.has_changes() {
                info!("No changes required, state is converged");
                result.success = true;
                result.errors.clear();
                break;
            }

            let plan = DeploymentPlan::from_diff(&diff, &guardrails, config_hash);
            let execution = executor.execute(&plan).await?;
            result.absorb(&execution);
            ledger.flush(self.store).await?;

            if self.cancel.is_cancelled() && execution.skipped > 0 {
                warn!("Cancelled with {} action(s) not started", execution.skipped);
                return Err(ReconcileError::Cancelled {
                    remaining: execution.skipped,
                }
                .into());
            }

            if execution.all_successful() {
                result.success = true;
                result.errors.clear();
                break;
            }

            result.errors = execution
                .failures()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.action.addr)))
                .collect();

            if attempt < engine.max_attempts {
                warn!(
                    "{} action(s) failed, retrying in {}s",
                    execution.failed, engine.attempt_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(engine.attempt_delay_secs)).await;
            }
        }

        if !result.success {
            error!("Reconciliation finished with {} error(s)", result.errors.len());
        }
        Ok(result)
    }

    /// Builds the plan an apply would execute, without changing anything.
    ///
    /// Tracked instances are refreshed in memory first when refresh is
    /// enabled; the refreshed view is not saved.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or a failed refresh.
    pub async fn plan(&self) -> Result<DeploymentPlan> {
        let ledger = self.load_ledger().await?;
        let desired = self.registry.desired_resources(&self.config.resources)?;

        if self.config.engine.refresh {
            self.refresh_ledger(&ledger).await?;
        }

        let config_hash = self.hasher.hash_config(self.config);
        let diff = self
            .diff_engine
            .compute_diff(&desired, &ledger.records(), &self.registry)?;

        if diff.has_changes() {
            Ok(DeploymentPlan::from_diff(&diff, &self.config.guardrails(), &config_hash))
        } else {
            Ok(DeploymentPlan::empty(&config_hash))
        }
    }

    /// Re-reads every tracked instance and saves the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails for a reason other than the instance
    /// being gone, or if state cannot be saved.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.locked(async {
            let ledger = self.load_ledger().await?;
            let run_id = Uuid::new_v4();
            let outcome = self.refresh_ledger(&ledger).await;

            let entry = DeploymentHistoryEntry::new(
                DeploymentOperation::Refresh,
                run_id,
                &ledger.config_hash(),
                ledger.records().iter().map(|r| r.addr.to_string()).collect(),
            );
            ledger.record_history(match &outcome {
                Ok(_) => entry,
                Err(e) => entry.failed(e.to_string()),
            });
            ledger.flush(self.store).await?;
            outcome
        })
        .await
    }

    /// Compares stored records with the remote side and the configuration.
    ///
    /// Nothing is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails or the configuration is invalid.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in {}", self.config.qualified_name());

        let ledger = self.load_ledger().await?;
        let desired = self.registry.desired_resources(&self.config.resources)?;
        let total_tracked = ledger.len();

        let refresh = self.refresh_ledger(&ledger).await?;
        let diff = self
            .diff_engine
            .compute_diff(&desired, &ledger.records(), &self.registry)?;
        let pending: Vec<String> = diff
            .actionable_diffs()
            .iter()
            .map(|d| d.addr.to_string())
            .collect();

        Ok(DriftReport {
            has_drift: !refresh.drifted.is_empty() || !pending.is_empty(),
            drifted: refresh.drifted,
            pending,
            total_tracked,
        })
    }

    /// Starts tracking an existing remote instance under an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or identifier is already tracked, the
    /// kind is unknown, or the instance does not exist.
    pub async fn import(&self, addr: &ResourceAddr, external_id: &str) -> Result<ResourceRecord> {
        info!("Importing {external_id} as {addr}");
        self.locked(self.import_locked(addr, external_id)).await
    }

    async fn import_locked(
        &self,
        addr: &ResourceAddr,
        external_id: &str,
    ) -> Result<ResourceRecord> {
        let ledger = self.load_ledger().await?;
        let adapter = self.registry.adapter(&addr.kind)?;

        if ledger.get(addr).is_some() {
            return Err(ReconcileError::AlreadyTracked {
                addr: addr.to_string(),
            }
            .into());
        }
        if let Some(existing) = ledger.find_by_id(&addr.kind, &ResourceId::new(external_id)) {
            return Err(ReconcileError::AlreadyTracked {
                addr: existing.addr.to_string(),
            }
            .into());
        }
        if !self.config.resource_addrs().contains(addr) {
            warn!("{addr} is not in the configuration; the next apply will delete it");
        }

        let imported = {
            let _guard = ledger
                .lock_instance(&format!("{}/{external_id}", addr.kind))
                .await;
            adapter.import(external_id).await?
        };

        let record = ResourceRecord::new(addr.clone(), imported.id, imported.attributes);
        ledger.commit(record.clone());
        ledger.record_history(DeploymentHistoryEntry::new(
            DeploymentOperation::Import,
            Uuid::new_v4(),
            &ledger.config_hash(),
            vec![addr.to_string()],
        ));
        ledger.flush(self.store).await?;

        info!("Imported {addr} ({})", record.id);
        Ok(record)
    }

    /// Deletes every tracked instance.
    ///
    /// # Errors
    ///
    /// Returns an error if guardrails forbid it, the run is cancelled, or
    /// state cannot be saved.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        info!("Destroying all resources of {}", self.config.qualified_name());
        self.locked(self.destroy_locked()).await
    }

    async fn destroy_locked(&self) -> Result<ReconciliationResult> {
        let run_id = Uuid::new_v4();
        let ledger = self.load_ledger().await?;
        let config_hash = ledger.config_hash();
        let records = ledger.records();

        let plan = DeploymentPlan::destroy(&records, &self.config.guardrails(), &config_hash);
        let executor = PlanExecutor::new(Arc::clone(&self.registry), Arc::clone(&ledger))
            .with_parallelism(self.config.engine.parallelism)
            .with_cancellation(self.cancel.clone());

        let outcome = executor.execute(&plan).await;

        let entry = DeploymentHistoryEntry::new(
            DeploymentOperation::Destroy,
            run_id,
            &config_hash,
            plan.addrs(),
        );
        let entry = match &outcome {
            Ok(execution) if execution.all_successful() => entry,
            Ok(execution) => entry.failed(format!("{} action(s) failed", execution.failed)),
            Err(e) => entry.failed(e.to_string()),
        };
        ledger.record_history(entry);
        let serial = ledger.flush(self.store).await?;

        let execution = outcome?;
        let mut result = ReconciliationResult::new(run_id);
        result.attempts = 1;
        result.absorb(&execution);
        result.success = execution.all_successful();
        result.errors = execution
            .failures()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.action.addr)))
            .collect();
        result.serial = serial;
        Ok(result)
    }

    /// Summarizes the stored state against the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if state or lock information cannot be read.
    pub async fn status(&self) -> Result<StatusReport> {
        let state = self.store.load().await?;
        let lock = self.store.get_lock_info().await?;
        let configured = self.config.resource_addrs();

        let (serial, resources, config_changed, last_run) = match &state {
            Some(state) => (
                Some(state.serial),
                state.resources.values().cloned().collect::<Vec<_>>(),
                state.config_hash != self.hasher.hash_config(self.config),
                state.last_run().cloned(),
            ),
            None => (None, Vec::new(), true, None),
        };

        let untracked = configured
            .iter()
            .filter(|addr| !resources.iter().any(|r| &r.addr == *addr))
            .map(ToString::to_string)
            .collect();
        let orphaned = resources
            .iter()
            .filter(|r| !configured.contains(&r.addr))
            .map(|r| r.addr.to_string())
            .collect();

        Ok(StatusReport {
            project: self.config.qualified_name(),
            backend: self.store.backend_type(),
            serial,
            resources,
            untracked,
            orphaned,
            config_changed,
            lock,
            last_run,
        })
    }

    /// Runs `work` while holding the state lock.
    async fn locked<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = self.store.acquire_lock(&self.holder).await?;
        debug!("Holding state lock {}", lock.lock_id);

        let result = work.await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn load_ledger(&self) -> Result<Arc<StateLedger>> {
        let project = &self.config.project;
        let ledger = match self.store.load().await? {
            Some(state) => {
                if state.project != project.name || state.environment != project.environment {
                    warn!(
                        "State belongs to {}-{}, configuration is for {}",
                        state.project,
                        state.environment,
                        self.config.qualified_name()
                    );
                }
                StateLedger::from_state(state)?
            }
            None => {
                debug!("No existing state, starting empty");
                StateLedger::new(&project.name, &project.environment)
            }
        };
        Ok(Arc::new(ledger))
    }

    /// Reads every tracked instance into the ledger.
    ///
    /// Instances reported missing are dropped from the ledger. Any other
    /// read failure aborts the refresh after every instance was tried.
    async fn refresh_ledger(&self, ledger: &StateLedger) -> Result<RefreshReport> {
        let records = ledger.records();
        let total = records.len();
        info!("Refreshing {total} tracked resource(s)");

        let mut report = RefreshReport::default();
        let mut failures = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled {
                    remaining: total - index,
                }
                .into());
            }

            let adapter = match self.registry.adapter(&record.addr.kind) {
                Ok(adapter) => adapter,
                Err(e) => {
                    failures.push(format!("{}: {e}", record.addr));
                    continue;
                }
            };

            let read = {
                let _guard = ledger
                    .lock_instance(&format!("{}/{}", record.addr.kind, record.id))
                    .await;
                adapter.read(&record.id).await
            };

            match read {
                Ok(Some(attributes)) => {
                    report.refreshed += 1;
                    let fields =
                        Self::field_drift(adapter.schema(), &record.attributes, &attributes);
                    if !fields.is_empty() {
                        info!("{} drifted: {} attribute(s) changed", record.addr, fields.len());
                        report.drifted.push(ResourceDrift {
                            addr: record.addr.clone(),
                            id: record.id.clone(),
                            drift: DriftKind::Changed { fields },
                        });
                    }
                    ledger.commit(record.refreshed(attributes));
                }
                Ok(None) => {
                    report.refreshed += 1;
                    warn!(
                        "{} ({}) no longer exists, dropping it from state",
                        record.addr, record.id
                    );
                    ledger.forget(&record.addr);
                    report.drifted.push(ResourceDrift {
                        addr: record.addr.clone(),
                        id: record.id.clone(),
                        drift: DriftKind::Vanished,
                    });
                }
                Err(e) => {
                    error!("Failed to refresh {}: {e}", record.addr);
                    failures.push(format!("{}: {e}", record.addr));
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReconcileError::RefreshFailed { failures }.into())
        }
    }

    /// Attributes whose stored and observed values differ.
    fn field_drift(
        schema: &ResourceSchema,
        stored: &AttributeSet,
        observed: &AttributeSet,
    ) -> Vec<FieldDrift> {
        schema
            .attributes()
            .iter()
            .filter(|def| !def.is_computed())
            .filter_map(|def| {
                let before = stored.get(def.name);
                let after = observed.get(def.name);
                (before != after).then(|| FieldDrift {
                    field: def.name.to_string(),
                    stored: before.cloned(),
                    actual: after.cloned(),
                })
            })
            .collect()
    }
}

impl ReconciliationResult {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            success: false,
            attempts: 0,
            created: 0,
            updated: 0,
            replaced: 0,
            deleted: 0,
            unchanged: 0,
            errors: Vec::new(),
            serial: 0,
        }
    }

    /// Adds the successful actions of one pass to the totals.
    fn absorb(&mut self, execution: &ExecutionResult) {
        for result in &execution.results {
            if result.status != ActionStatus::Succeeded {
                continue;
            }
            match result.action.action_type {
                ActionType::Create => self.created += 1,
                ActionType::Update => self.updated += 1,
                ActionType::Replace => self.replaced += 1,
                ActionType::Delete => self.deleted += 1,
            }
        }
    }

    /// Total instances changed.
    #[must_use]
    pub const fn changed(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vanished => write!(f, "deleted outside of this tool"),
            Self::Changed { fields } => {
                let names: Vec<&str> = fields.iter().map(|d| d.field.as_str()).collect();
                write!(f, "changed: {}", names.join(", "))
            }
        }
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift {
            return write!(f, "No drift detected, state is converged");
        }

        writeln!(f, "Drift detected:")?;
        for resource in &self.drifted {
            writeln!(f, "  - {} ({}): {}", resource.addr, resource.id, resource.drift)?;
        }
        for addr in &self.pending {
            writeln!(f, "  - {addr}: differs from configuration")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, GuardrailsConfig};
    use crate::error::{DeployError, RemoteError, StateError};
    use crate::provider::ApiCacheAdapter;
    use crate::state::LocalStateStore;
    use crate::transport::{
        ApiCache, ApiCacheType, ApiCachingBehavior, InMemoryTransport, TransportCall,
    };
    use tempfile::TempDir;

    const CONFIG: &str = r"
project:
  name: storefront
engine:
  attempt_delay_secs: 0
resources:
  - kind: api_cache
    name: primary
    attributes:
      api_id: api-1
      api_caching_behavior: full_request_caching
      ttl: 3600
      type: large
";

    struct Harness {
        _temp: TempDir,
        store: LocalStateStore,
        transport: Arc<InMemoryTransport>,
        registry: Arc<ProviderRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().expect("temp dir");
            let store = LocalStateStore::with_base_dir(temp.path());
            let transport = Arc::new(InMemoryTransport::new());
            let registry = Arc::new(
                ProviderRegistry::new()
                    .with(Arc::new(ApiCacheAdapter::new(Arc::clone(&transport)))),
            );
            Self {
                _temp: temp,
                store,
                transport,
                registry,
            }
        }

        fn reconciler<'a>(&'a self, config: &'a DeployConfig) -> Reconciler<'a, LocalStateStore> {
            Reconciler::new(config, &self.store, Arc::clone(&self.registry))
        }
    }

    fn config(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    fn remote_cache() -> ApiCache {
        ApiCache {
            api_caching_behavior: ApiCachingBehavior::PerResolverCaching,
            ttl: 120,
            cache_type: ApiCacheType::Small,
            at_rest_encryption_enabled: Some(false),
            transit_encryption_enabled: Some(false),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_reconcile_creates_then_converges() {
        let h = Harness::new();
        let cfg = config(CONFIG);

        let first = h.reconciler(&cfg).reconcile().await.expect("reconcile");
        assert!(first.success);
        assert_eq!(first.created, 1);
        assert_eq!(first.serial, 2);

        let second = h.reconciler(&cfg).reconcile().await.expect("reconcile");
        assert!(second.success);
        assert_eq!(second.changed(), 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(h.transport.calls(TransportCall::Create), 1);

        let state = h.store.load().await.expect("load").expect("saved");
        assert_eq!(state.history.len(), 2);
        assert!(!state.config_hash.is_empty());
        assert!(!h.store.is_locked().await.expect("lock info"));
    }

    #[tokio::test]
    async fn test_ttl_change_updates_only_ttl() {
        let h = Harness::new();
        h.reconciler(&config(CONFIG)).reconcile().await.expect("reconcile");

        let changed = config(&CONFIG.replace("ttl: 3600", "ttl: 60"));
        let result = h.reconciler(&changed).reconcile().await.expect("reconcile");

        assert_eq!(result.updated, 1);
        let updates = h.transport.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ttl, Some(60));
        assert!(updates[0].api_caching_behavior.is_none());
        assert!(updates[0].cache_type.is_none());
        assert_eq!(h.transport.cache("api-1").map(|c| c.ttl), Some(60));
    }

    #[tokio::test]
    async fn test_encryption_change_replaces() {
        let h = Harness::new();
        h.reconciler(&config(CONFIG)).reconcile().await.expect("reconcile");

        let changed = config(&format!("{CONFIG}      at_rest_encryption_enabled: true\n"));
        let result = h.reconciler(&changed).reconcile().await.expect("reconcile");

        assert_eq!(result.replaced, 1);
        assert_eq!(h.transport.calls(TransportCall::Delete), 1);
        assert_eq!(h.transport.calls(TransportCall::Create), 2);
        assert_eq!(
            h.transport
                .cache("api-1")
                .and_then(|c| c.at_rest_encryption_enabled),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_invalid_config_makes_no_remote_calls() {
        let h = Harness::new();
        let cfg = config(&CONFIG.replace("ttl: 3600", "ttl: 0"));

        let err = h.reconciler(&cfg).reconcile().await.expect_err("invalid");
        assert!(matches!(err, DeployError::Validation(_)));
        assert_eq!(h.transport.total_calls(), 0);
        assert!(!h.store.is_locked().await.expect("lock info"));
    }

    #[tokio::test]
    async fn test_api_id_with_path_characters_is_rejected() {
        let h = Harness::new();
        let cfg = config(&CONFIG.replace("api_id: api-1", "api_id: \"other-api/ApiCache?x=\""));

        let err = h.reconciler(&cfg).reconcile().await.expect_err("invalid");
        assert!(matches!(err, DeployError::Validation(_)));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_vanished_instance_is_recreated() {
        let h = Harness::new();
        let cfg = config(CONFIG);
        h.reconciler(&cfg).reconcile().await.expect("reconcile");
        h.transport.remove("api-1");

        let drift = h.reconciler(&cfg).check_drift().await.expect("drift");
        assert!(drift.has_drift);
        assert_eq!(drift.drifted[0].drift, DriftKind::Vanished);
        assert_eq!(drift.pending, vec![String::from("api_cache.primary")]);

        let result = h.reconciler(&cfg).reconcile().await.expect("reconcile");
        assert_eq!(result.created, 1);
        assert!(h.transport.cache("api-1").is_some());
    }

    #[tokio::test]
    async fn test_refresh_records_remote_changes() {
        let h = Harness::new();
        let cfg = config(CONFIG);
        h.reconciler(&cfg).reconcile().await.expect("reconcile");
        h.transport.insert("api-1", remote_cache());

        let report = h.reconciler(&cfg).refresh().await.expect("refresh");
        assert_eq!(report.refreshed, 1);
        let DriftKind::Changed { fields } = &report.drifted[0].drift else {
            panic!("expected changed drift");
        };
        assert_eq!(fields.len(), 3);

        let state = h.store.load().await.expect("load").expect("saved");
        let record = state
            .get(&ResourceAddr::new("api_cache", "primary"))
            .expect("tracked");
        assert_eq!(record.attributes.get_int("ttl"), Some(120));
    }

    #[tokio::test]
    async fn test_refresh_error_aborts() {
        let h = Harness::new();
        let cfg = config(CONFIG);
        h.reconciler(&cfg).reconcile().await.expect("reconcile");
        h.transport
            .fail_next(TransportCall::Get, RemoteError::network("connection refused"));

        let err = h.reconciler(&cfg).reconcile().await.expect_err("refresh fails");
        assert!(matches!(
            err,
            DeployError::Reconcile(ReconcileError::RefreshFailed { .. })
        ));
        assert_eq!(h.transport.calls(TransportCall::Create), 1);
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let h = Harness::new();
        h.reconciler(&config(CONFIG)).reconcile().await.expect("reconcile");

        let empty = config("project: {name: storefront}");
        let result = h.reconciler(&empty).reconcile().await.expect("reconcile");

        assert_eq!(result.deleted, 1);
        assert!(h.transport.is_empty());
    }

    #[tokio::test]
    async fn test_prevent_destroy_blocks_delete() {
        let h = Harness::new();
        h.reconciler(&config(CONFIG)).reconcile().await.expect("reconcile");

        let mut empty = config("project: {name: storefront}");
        empty.guardrails = Some(GuardrailsConfig {
            prevent_destroy: true,
            max_deletes: None,
        });
        let err = h.reconciler(&empty).reconcile().await.expect_err("blocked");

        assert!(matches!(err, DeployError::Plan(_)));
        assert_eq!(h.transport.calls(TransportCall::Delete), 0);
        let state = h.store.load().await.expect("load").expect("saved");
        assert!(state.last_run().is_some_and(|r| !r.success));
    }

    #[tokio::test]
    async fn test_failed_pass_is_retried() {
        let h = Harness::new();
        let cfg = config(&CONFIG.replace(
            "attempt_delay_secs: 0",
            "attempt_delay_secs: 0\n  max_attempts: 2",
        ));
        h.transport.fail_next(
            TransportCall::Create,
            RemoteError::Throttled {
                retry_after_secs: 0,
            },
        );

        let result = h.reconciler(&cfg).reconcile().await.expect("reconcile");
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(h.transport.calls(TransportCall::Create), 2);
    }

    #[tokio::test]
    async fn test_failed_action_is_reported() {
        let h = Harness::new();
        h.transport
            .fail_next(TransportCall::Create, RemoteError::bad_request("quota"));

        let result = h.reconciler(&config(CONFIG)).reconcile().await.expect("reconcile");
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("api_cache.primary"));

        let state = h.store.load().await.expect("load").expect("saved");
        assert!(state.config_hash.is_empty());
    }

    #[tokio::test]
    async fn test_import_then_converge() {
        let h = Harness::new();
        h.transport.insert("api-1", remote_cache());
        let cfg = config(CONFIG);
        let addr = ResourceAddr::new("api_cache", "primary");

        let record = h.reconciler(&cfg).import(&addr, "api-1").await.expect("import");
        assert_eq!(record.id, ResourceId::new("api-1"));
        assert_eq!(record.attributes.get_str("type"), Some("SMALL"));

        let again = h.reconciler(&cfg).import(&addr, "api-1").await;
        assert!(matches!(
            again,
            Err(DeployError::Reconcile(ReconcileError::AlreadyTracked { .. }))
        ));

        let result = h.reconciler(&cfg).reconcile().await.expect("reconcile");
        assert_eq!(result.updated, 1);
        assert_eq!(h.transport.calls(TransportCall::Create), 0);
    }

    #[tokio::test]
    async fn test_import_of_missing_instance_fails() {
        let h = Harness::new();
        let cfg = config(CONFIG);
        let addr = ResourceAddr::new("api_cache", "primary");

        assert!(h.reconciler(&cfg).import(&addr, "api-404").await.is_err());
        assert!(h.store.load().await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let h = Harness::new();
        let cfg = config(CONFIG);
        h.reconciler(&cfg).reconcile().await.expect("reconcile");

        let result = h.reconciler(&cfg).destroy().await.expect("destroy");
        assert!(result.success);
        assert_eq!(result.deleted, 1);
        assert!(h.transport.is_empty());

        let state = h.store.load().await.expect("load").expect("saved");
        assert!(state.resources.is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_blocks_reconcile() {
        let h = Harness::new();
        h.store.acquire_lock("someone-else").await.expect("lock");

        let err = h.reconciler(&config(CONFIG)).reconcile().await.expect_err("locked");
        assert!(matches!(
            err,
            DeployError::State(StateError::LockedByOther { .. })
        ));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_reconcile() {
        let h = Harness::new();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let cfg = config(CONFIG);
        let err = h
            .reconciler(&cfg)
            .with_cancellation(cancel)
            .reconcile()
            .await
            .expect_err("cancelled");
        assert!(matches!(
            err,
            DeployError::Reconcile(ReconcileError::Cancelled { remaining: 1 })
        ));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let h = Harness::new();
        let cfg = config(CONFIG);

        let before = h.reconciler(&cfg).status().await.expect("status");
        assert!(before.serial.is_none());
        assert_eq!(before.untracked, vec![String::from("api_cache.primary")]);

        h.reconciler(&cfg).reconcile().await.expect("reconcile");
        let after = h.reconciler(&cfg).status().await.expect("status");
        assert!(after.untracked.is_empty());
        assert!(after.orphaned.is_empty());
        assert!(!after.config_changed);
        assert!(after.last_run.is_some_and(|r| r.success));
        assert_eq!(after.backend, "local");
    }
}
