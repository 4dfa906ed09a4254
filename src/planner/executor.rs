//! Plan executor for applying deployment plans.
//!
//! Deletes run first as their own phase, then replaces, then creates and
//! updates. A replace can free an identifier that a create in the same plan
//! reuses, so it always finishes first. Within a phase, actions run
//! concurrently up to the configured parallelism, and all remote calls on
//! one identifier are serialized through the ledger's instance locks. An in-flight call is never interrupted: cancellation and
//! fail-fast only keep actions that have not started from starting.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, ReconcileError, Result};
use crate::provider::{ProviderRegistry, ResourceAdapter};
use crate::resource::{InstanceState, ResourceAddr, ResourceId};
use crate::schema::ValidAttributes;
use crate::state::{ResourceRecord, StateLedger};

use super::plan::{ActionType, DeploymentPlan, PlannedAction};

/// Shared flag telling the executor to stop starting new actions.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executor for deployment plans.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<StateLedger>,
    parallelism: usize,
    fail_fast: bool,
    cancel: CancellationFlag,
}

/// Outcome of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Every remote call succeeded.
    Succeeded,
    /// A remote call failed.
    Failed,
    /// The action never started.
    Skipped,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Action index in the plan.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Outcome.
    pub status: ActionStatus,
    /// Identifier of the instance, if known.
    pub id: Option<ResourceId>,
    /// Lifecycle states the instance passed through.
    pub transitions: Vec<InstanceState>,
    /// Error message (if failed or skipped).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Individual action results, in plan order.
    pub results: Vec<ActionResult>,
    /// Total actions executed.
    pub total_executed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of actions that never started.
    pub skipped: usize,
    /// Whether no action failed.
    pub success: bool,
}

/// Tracks the lifecycle of one instance through an action.
#[derive(Debug)]
struct Lifecycle(Vec<InstanceState>);

impl Lifecycle {
    fn starting_at(state: InstanceState) -> Self {
        Self(vec![state])
    }

    fn advance(&mut self, next: InstanceState) {
        if let Some(&current) = self.0.last() {
            debug_assert!(
                current.can_transition_to(next),
                "illegal transition {current} -> {next}"
            );
        }
        self.0.push(next);
    }

    fn into_states(self) -> Vec<InstanceState> {
        self.0
    }
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, ledger: Arc<StateLedger>) -> Self {
        Self {
            registry,
            ledger,
            parallelism: 4,
            fail_fast: false,
            cancel: CancellationFlag::new(),
        }
    }

    /// Sets how many actions may run at once.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Stops starting new actions after the first failure.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Uses a shared cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes a deployment plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan violates its guardrails. Failures of
    /// individual actions are reported in the result, not as an error.
    pub async fn execute(&self, plan: &DeploymentPlan) -> Result<ExecutionResult> {
        if let Err(e) = plan.ensure_guardrails() {
            error!("Plan does not pass guardrails");
            for violation in &plan.guardrail_violations {
                error!("  - {violation}");
            }
            return Err(e);
        }

        info!(
            "Executing deployment plan with {} actions (parallelism {})",
            plan.actions.len(),
            self.parallelism
        );

        let phase = |types: &[ActionType]| -> Vec<usize> {
            (0..plan.actions.len())
                .filter(|&i| types.contains(&plan.actions[i].action_type))
                .collect()
        };
        let phases = [
            phase(&[ActionType::Delete]),
            phase(&[ActionType::Replace]),
            phase(&[ActionType::Create, ActionType::Update]),
        ];

        let halted = Arc::new(AtomicBool::new(false));
        let mut results = Vec::with_capacity(plan.actions.len());
        for indices in &phases {
            results.extend(self.run_phase(plan, indices, &halted).await);
        }
        results.sort_by_key(|r| r.index);

        let execution = ExecutionResult::from_results(results);
        info!("{execution}");
        Ok(execution)
    }

    /// Runs a set of actions concurrently and waits for all of them.
    async fn run_phase(
        &self,
        plan: &DeploymentPlan,
        indices: &[usize],
        halted: &Arc<AtomicBool>,
    ) -> Vec<ActionResult> {
        if indices.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for &index in indices {
            let action = plan.actions[index].clone();
            let executor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let halted = Arc::clone(halted);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ActionResult::skipped(index, action, "executor shut down");
                };
                if executor.cancel.is_cancelled() {
                    return ActionResult::skipped(index, action, "cancelled");
                }
                if halted.load(Ordering::SeqCst) {
                    return ActionResult::skipped(index, action, "an earlier action failed");
                }

                let result = executor.execute_action(index, action).await;
                if result.status == ActionStatus::Failed && executor.fail_fast {
                    halted.store(true, Ordering::SeqCst);
                }
                result
            });
        }

        let mut results = Vec::with_capacity(indices.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Action task ended abnormally: {e}"),
            }
        }

        for &index in indices {
            if !results.iter().any(|r| r.index == index) {
                results.push(ActionResult::failed(
                    index,
                    plan.actions[index].clone(),
                    None,
                    Vec::new(),
                    "action task ended abnormally",
                ));
            }
        }

        results
    }

    /// Executes a single action while holding its identifier locks.
    async fn execute_action(&self, index: usize, action: PlannedAction) -> ActionResult {
        info!("Executing action {index}: {}", action.description());

        let adapter = match self.registry.adapter(&action.addr.kind) {
            Ok(adapter) => adapter,
            Err(e) => return ActionResult::failed(index, action, None, Vec::new(), e.to_string()),
        };

        let keys = Self::lock_keys(adapter.as_ref(), &action);
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            debug!("Waiting for lock {key}");
            guards.push(self.ledger.lock_instance(key).await);
        }

        let mut lifecycle = Lifecycle::starting_at(match action.action_type {
            ActionType::Create => InstanceState::Absent,
            _ => InstanceState::Present,
        });

        let outcome = match action.action_type {
            ActionType::Create => self.create(adapter.as_ref(), &action, &mut lifecycle).await,
            ActionType::Update => self.update(adapter.as_ref(), &action, &mut lifecycle).await,
            ActionType::Delete => self.delete(adapter.as_ref(), &action, &mut lifecycle).await,
            ActionType::Replace => {
                match self.delete(adapter.as_ref(), &action, &mut lifecycle).await {
                    Ok(_) => self.create(adapter.as_ref(), &action, &mut lifecycle).await,
                    Err(e) => Err(e),
                }
            }
        };
        drop(guards);

        match outcome {
            Ok(id) => ActionResult {
                index,
                action,
                status: ActionStatus::Succeeded,
                id: Some(id),
                transitions: lifecycle.into_states(),
                error: None,
            },
            Err(e) => {
                if e.is_retryable() {
                    warn!("Transient failure to {} {}: {e}", action.action_type, action.addr);
                } else {
                    error!("Failed to {} {}: {e}", action.action_type, action.addr);
                }
                let id = action.id.clone();
                ActionResult::failed(index, action, id, lifecycle.into_states(), e.to_string())
            }
        }
    }

    /// Identifier locks an action needs, in acquisition order.
    ///
    /// Both the tracked identifier and the one a create would produce are
    /// locked, so a replace that moves an instance cannot race with another
    /// action on either side. Keys are sorted so two actions never wait on
    /// each other.
    fn lock_keys(adapter: &dyn ResourceAdapter, action: &PlannedAction) -> Vec<String> {
        let kind = &action.addr.kind;
        let mut keys = BTreeSet::new();

        if let Some(id) = &action.id {
            keys.insert(format!("{kind}/{id}"));
        }
        if let Some(id) = action.desired.as_ref().and_then(|d| adapter.planned_id(d)) {
            keys.insert(format!("{kind}/{id}"));
        }
        if keys.is_empty() {
            keys.insert(action.addr.to_string());
        }

        keys.into_iter().collect()
    }

    async fn create(
        &self,
        adapter: &dyn ResourceAdapter,
        action: &PlannedAction,
        lifecycle: &mut Lifecycle,
    ) -> Result<ResourceId> {
        let desired = action.desired.as_ref().ok_or_else(|| {
            DeployError::internal(format!("create of {} has no attributes", action.addr))
        })?;

        lifecycle.advance(InstanceState::Creating);
        let id = match adapter.create(desired).await {
            Ok(id) => id,
            Err(e) => {
                lifecycle.advance(InstanceState::Absent);
                return Err(e);
            }
        };

        self.observe_created(adapter, &action.addr, id, desired, lifecycle)
            .await
    }

    /// Reads a freshly created instance and starts tracking it.
    ///
    /// If the read fails the instance is still tracked with the attributes
    /// it was created with, defaults included, so the next run neither
    /// creates it again nor sees unset optional attributes as changed.
    async fn observe_created(
        &self,
        adapter: &dyn ResourceAdapter,
        addr: &ResourceAddr,
        id: ResourceId,
        desired: &ValidAttributes,
        lifecycle: &mut Lifecycle,
    ) -> Result<ResourceId> {
        match adapter.read(&id).await {
            Ok(Some(attributes)) => {
                self.ledger
                    .commit(ResourceRecord::new(addr.clone(), id.clone(), attributes));
                lifecycle.advance(InstanceState::Present);
                info!("Created {addr} ({id})");
                Ok(id)
            }
            Ok(None) => {
                lifecycle.advance(InstanceState::Absent);
                Err(Self::vanished(addr, &id, "creation"))
            }
            Err(e) => {
                warn!("Created {addr} ({id}) but could not read it back: {e}");
                self.ledger.commit(ResourceRecord::new(
                    addr.clone(),
                    id.clone(),
                    adapter.schema().fill_defaults(desired),
                ));
                lifecycle.advance(InstanceState::Present);
                Err(e)
            }
        }
    }

    async fn update(
        &self,
        adapter: &dyn ResourceAdapter,
        action: &PlannedAction,
        lifecycle: &mut Lifecycle,
    ) -> Result<ResourceId> {
        let id = Self::tracked_id(action)?;

        lifecycle.advance(InstanceState::Updating);
        if let Err(e) = adapter.update(id, &action.changes).await {
            lifecycle.advance(InstanceState::Present);
            return Err(e);
        }

        match adapter.read(id).await {
            Ok(Some(attributes)) => {
                let record = match self.ledger.get(&action.addr) {
                    Some(existing) => existing.refreshed(attributes),
                    None => ResourceRecord::new(action.addr.clone(), id.clone(), attributes),
                };
                self.ledger.commit(record);
                lifecycle.advance(InstanceState::Present);
                info!("Updated {} ({id})", action.addr);
                Ok(id.clone())
            }
            Ok(None) => {
                self.ledger.forget(&action.addr);
                lifecycle.advance(InstanceState::Absent);
                Err(Self::vanished(&action.addr, id, "update"))
            }
            Err(e) => {
                warn!("Updated {} ({id}) but could not read it back: {e}", action.addr);
                lifecycle.advance(InstanceState::Present);
                Err(e)
            }
        }
    }

    async fn delete(
        &self,
        adapter: &dyn ResourceAdapter,
        action: &PlannedAction,
        lifecycle: &mut Lifecycle,
    ) -> Result<ResourceId> {
        let id = Self::tracked_id(action)?;

        lifecycle.advance(InstanceState::Deleting);
        match adapter.delete(id).await {
            Ok(()) => {
                self.ledger.forget(&action.addr);
                lifecycle.advance(InstanceState::Absent);
                info!("Deleted {} ({id})", action.addr);
                Ok(id.clone())
            }
            Err(e) => {
                lifecycle.advance(InstanceState::Present);
                Err(e)
            }
        }
    }

    fn tracked_id(action: &PlannedAction) -> Result<&ResourceId> {
        action.id.as_ref().ok_or_else(|| {
            DeployError::internal(format!(
                "{} of {} has no tracked identifier",
                action.action_type, action.addr
            ))
        })
    }

    fn vanished(addr: &ResourceAddr, id: &ResourceId, during: &str) -> DeployError {
        ReconcileError::ResourceReconcileFailed {
            resource_type: addr.kind.clone(),
            name: addr.name.clone(),
            reason: format!("{id} was not found right after {during}"),
        }
        .into()
    }
}

impl ActionResult {
    fn skipped(index: usize, action: PlannedAction, reason: &str) -> Self {
        debug!("Skipping action {index} ({}): {reason}", action.addr);
        Self {
            index,
            id: action.id.clone(),
            action,
            status: ActionStatus::Skipped,
            transitions: Vec::new(),
            error: Some(reason.to_string()),
        }
    }

    fn failed(
        index: usize,
        action: PlannedAction,
        id: Option<ResourceId>,
        transitions: Vec<InstanceState>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            index,
            action,
            status: ActionStatus::Failed,
            id,
            transitions,
            error: Some(error.into()),
        }
    }
}

impl ExecutionResult {
    fn from_results(results: Vec<ActionResult>) -> Self {
        let count = |status: ActionStatus| results.iter().filter(|r| r.status == status).count();
        let successful = count(ActionStatus::Succeeded);
        let failed = count(ActionStatus::Failed);
        let skipped = count(ActionStatus::Skipped);

        Self {
            total_executed: successful + failed,
            successful,
            failed,
            skipped,
            success: failed == 0,
            results,
        }
    }

    /// Returns true if all actions succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }

    /// Results of actions that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed, self.successful, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardrailsConfig;
    use crate::error::RemoteError;
    use crate::planner::{DiffEngine, DiffType};
    use crate::resource::DesiredResource;
    use crate::provider::{api_cache_schema, ApiCacheAdapter};
    use crate::schema::AttributeSet;
    use crate::transport::{
        ApiCache, ApiCacheType, ApiCachingBehavior, InMemoryTransport, TransportCall,
    };
    use chrono::Utc;
    use std::time::Duration;

    use InstanceState::{Absent, Creating, Deleting, Present, Updating};

    struct Harness {
        transport: Arc<InMemoryTransport>,
        ledger: Arc<StateLedger>,
        executor: PlanExecutor,
    }

    fn harness(transport: InMemoryTransport) -> Harness {
        let transport = Arc::new(transport);
        let registry = Arc::new(
            ProviderRegistry::new().with(Arc::new(ApiCacheAdapter::new(Arc::clone(&transport)))),
        );
        let ledger = Arc::new(StateLedger::new("test", "dev"));
        let executor = PlanExecutor::new(registry, Arc::clone(&ledger));
        Harness {
            transport,
            ledger,
            executor,
        }
    }

    fn attributes(api_id: &str, ttl: i64) -> ValidAttributes {
        let set = AttributeSet::new()
            .with("api_id", api_id)
            .with("api_caching_behavior", "FULL_REQUEST_CACHING")
            .with("ttl", ttl)
            .with("type", "LARGE");
        api_cache_schema().validate(&set).expect("valid")
    }

    fn cache(ttl: i64) -> ApiCache {
        ApiCache {
            api_caching_behavior: ApiCachingBehavior::FullRequestCaching,
            ttl,
            cache_type: ApiCacheType::Large,
            at_rest_encryption_enabled: Some(false),
            transit_encryption_enabled: Some(false),
            status: None,
        }
    }

    fn action(action_type: ActionType, name: &str, id: Option<&str>) -> PlannedAction {
        PlannedAction {
            action_type,
            addr: ResourceAddr::new("api_cache", name),
            id: id.map(ResourceId::new),
            desired: None,
            changes: AttributeSet::new(),
            details: Vec::new(),
            reason: String::new(),
        }
    }

    fn create(name: &str, api_id: &str) -> PlannedAction {
        PlannedAction {
            desired: Some(attributes(api_id, 3600)),
            ..action(ActionType::Create, name, None)
        }
    }

    fn update(name: &str, id: &str, ttl: i64) -> PlannedAction {
        PlannedAction {
            changes: AttributeSet::new().with("ttl", ttl),
            ..action(ActionType::Update, name, Some(id))
        }
    }

    fn track(h: &Harness, name: &str, id: &str) {
        h.transport.insert(id, cache(300));
        h.ledger.commit(ResourceRecord::new(
            ResourceAddr::new("api_cache", name),
            ResourceId::new(id),
            AttributeSet::new().with("ttl", 300),
        ));
    }

    fn plan(actions: Vec<PlannedAction>) -> DeploymentPlan {
        DeploymentPlan {
            created_at: Utc::now(),
            config_hash: String::from("test"),
            actions,
            passes_guardrails: true,
            guardrail_violations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_tracks_instance() {
        let h = harness(InMemoryTransport::new());

        let result = h
            .executor
            .execute(&plan(vec![create("primary", "api-1")]))
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert_eq!(result.results[0].transitions, vec![Absent, Creating, Present]);
        assert_eq!(h.transport.calls(TransportCall::Create), 1);

        let record = h
            .ledger
            .get(&ResourceAddr::new("api_cache", "primary"))
            .expect("tracked");
        assert_eq!(record.id, ResourceId::new("api-1"));
        assert_eq!(record.attributes.get_int("ttl"), Some(3600));
        assert_eq!(record.attributes.get_str("type"), Some("LARGE"));
    }

    #[tokio::test]
    async fn test_create_failure_leaves_instance_absent() {
        let h = harness(InMemoryTransport::new());
        h.transport
            .fail_next(TransportCall::Create, RemoteError::network("connection reset"));

        let result = h
            .executor
            .execute(&plan(vec![create("primary", "api-1")]))
            .await
            .expect("execute");

        assert_eq!(result.failed, 1);
        assert_eq!(result.results[0].transitions, vec![Absent, Creating, Absent]);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_after_create_still_tracks() {
        let h = harness(InMemoryTransport::new());
        h.transport.fail_next(
            TransportCall::Get,
            RemoteError::Unavailable {
                status: 503,
                message: String::from("busy"),
            },
        );

        let result = h
            .executor
            .execute(&plan(vec![create("primary", "api-1")]))
            .await
            .expect("execute");

        assert_eq!(result.failed, 1);
        let record = h
            .ledger
            .get(&ResourceAddr::new("api_cache", "primary"))
            .expect("still tracked");
        assert_eq!(record.attributes.get_int("ttl"), Some(3600));
        assert_eq!(record.attributes.get_bool("at_rest_encryption_enabled"), Some(false));
        assert_eq!(record.attributes.get_bool("transit_encryption_enabled"), Some(false));

        let registry =
            ProviderRegistry::new().with(Arc::new(ApiCacheAdapter::new(Arc::clone(&h.transport))));
        let desired = DesiredResource {
            addr: ResourceAddr::new("api_cache", "primary"),
            attributes: attributes("api-1", 3600),
        };
        let diff = DiffEngine::new()
            .compute_diff(&[desired], &h.ledger.records(), &registry)
            .expect("diff");
        assert_eq!(diff.diffs[0].diff_type, DiffType::NoChange);
    }

    #[tokio::test]
    async fn test_update_refreshes_record() {
        let h = harness(InMemoryTransport::new());
        track(&h, "primary", "api-1");

        let result = h
            .executor
            .execute(&plan(vec![update("primary", "api-1", 900)]))
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert_eq!(result.results[0].transitions, vec![Present, Updating, Present]);
        let record = h
            .ledger
            .get(&ResourceAddr::new("api_cache", "primary"))
            .expect("tracked");
        assert_eq!(record.attributes.get_int("ttl"), Some(900));
    }

    #[tokio::test]
    async fn test_update_failure_keeps_stale_record() {
        let h = harness(InMemoryTransport::new());
        track(&h, "primary", "api-1");
        h.transport.fail_next(
            TransportCall::Update,
            RemoteError::Conflict {
                message: String::from("busy"),
            },
        );

        let result = h
            .executor
            .execute(&plan(vec![update("primary", "api-1", 900)]))
            .await
            .expect("execute");

        assert_eq!(result.failed, 1);
        let record = h
            .ledger
            .get(&ResourceAddr::new("api_cache", "primary"))
            .expect("tracked");
        assert_eq!(record.attributes.get_int("ttl"), Some(300));
    }

    #[tokio::test]
    async fn test_delete_of_missing_instance_succeeds() {
        let h = harness(InMemoryTransport::new());
        h.ledger.commit(ResourceRecord::new(
            ResourceAddr::new("api_cache", "gone"),
            ResourceId::new("api-9"),
            AttributeSet::new(),
        ));

        let result = h
            .executor
            .execute(&plan(vec![action(ActionType::Delete, "gone", Some("api-9"))]))
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert_eq!(result.results[0].transitions, vec![Present, Deleting, Absent]);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_replace_deletes_then_creates() {
        let h = harness(InMemoryTransport::new());
        track(&h, "primary", "api-1");

        let replace = PlannedAction {
            desired: Some(attributes("api-2", 60)),
            ..action(ActionType::Replace, "primary", Some("api-1"))
        };
        let result = h.executor.execute(&plan(vec![replace])).await.expect("execute");

        assert!(result.all_successful());
        assert_eq!(
            result.results[0].transitions,
            vec![Present, Deleting, Absent, Creating, Present]
        );
        assert!(h.transport.cache("api-1").is_none());
        assert!(h.transport.cache("api-2").is_some());
        assert_eq!(result.results[0].id, Some(ResourceId::new("api-2")));
    }

    #[tokio::test]
    async fn test_replace_frees_id_before_create_reuses_it() {
        let h = harness(InMemoryTransport::new().with_latency(Duration::from_millis(10)));
        track(&h, "primary", "api-1");

        let replace = PlannedAction {
            desired: Some(attributes("api-2", 60)),
            ..action(ActionType::Replace, "primary", Some("api-1"))
        };
        let executor = h.executor.clone().with_parallelism(8);
        let result = executor
            .execute(&plan(vec![create("secondary", "api-1"), replace]))
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert!(h.transport.cache("api-1").is_some());
        assert!(h.transport.cache("api-2").is_some());
        let secondary = h
            .ledger
            .get(&ResourceAddr::new("api_cache", "secondary"))
            .expect("tracked");
        assert_eq!(secondary.id, ResourceId::new("api-1"));
    }

    #[tokio::test]
    async fn test_same_id_actions_never_overlap() {
        let h = harness(InMemoryTransport::new().with_latency(Duration::from_millis(20)));
        track(&h, "a", "api-1");
        track(&h, "b", "api-1");

        let executor = h.executor.clone().with_parallelism(8);
        let result = executor
            .execute(&plan(vec![
                update("a", "api-1", 60),
                update("b", "api-1", 120),
                update("a", "api-1", 180),
            ]))
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert_eq!(h.transport.max_overlap(), 1);
        assert_eq!(h.transport.calls(TransportCall::Update), 3);
    }

    #[tokio::test]
    async fn test_cancelled_actions_are_skipped() {
        let h = harness(InMemoryTransport::new());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let executor = h.executor.clone().with_cancellation(cancel);
        let result = executor
            .execute(&plan(vec![create("a", "api-1"), create("b", "api-2")]))
            .await
            .expect("execute");

        assert_eq!(result.skipped, 2);
        assert_eq!(result.total_executed, 0);
        assert!(!result.all_successful());
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_starting_actions() {
        let h = harness(InMemoryTransport::new());
        h.transport
            .fail_next(TransportCall::Create, RemoteError::bad_request("rejected"));

        let executor = h.executor.clone().with_parallelism(1).with_fail_fast(true);
        let result = executor
            .execute(&plan(vec![create("a", "api-1"), create("b", "api-2")]))
            .await
            .expect("execute");

        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(h.transport.calls(TransportCall::Create), 1);
    }

    #[tokio::test]
    async fn test_guardrail_violation_blocks_execution() {
        let h = harness(InMemoryTransport::new());
        track(&h, "primary", "api-1");

        let records = h.ledger.records();
        let guardrails = GuardrailsConfig {
            prevent_destroy: true,
            max_deletes: None,
        };
        let destroy = DeploymentPlan::destroy(&records, &guardrails, "test");

        assert!(h.executor.execute(&destroy).await.is_err());
        assert_eq!(h.transport.total_calls(), 0);
        assert_eq!(h.ledger.len(), 1);
    }
}
