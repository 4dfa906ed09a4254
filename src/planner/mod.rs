//! Planning module for deployment operations.
//!
//! This module handles the comparison between desired and stored states,
//! generating plans and executing them against the remote adapters.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionResult, ActionStatus, CancellationFlag, ExecutionResult, PlanExecutor};
pub use plan::{ActionType, DeploymentPlan, PlannedAction};
