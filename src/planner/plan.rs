//! Deployment plan types and construction.
//!
//! A plan is the ordered list of actions a diff calls for, checked against
//! the configured guardrails before anything runs.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::GuardrailsConfig;
use crate::error::{PlanError, Result};
use crate::resource::{ResourceAddr, ResourceId};
use crate::schema::{AttributeSet, ValidAttributes};
use crate::state::ResourceRecord;

use super::diff::{DiffDetail, DiffResult, DiffType, ResourceDiff};

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Whether the plan passes guardrails.
    pub passes_guardrails: bool,
    /// Guardrail violations (if any).
    pub guardrail_violations: Vec<String>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource address.
    pub addr: ResourceAddr,
    /// Identifier of the tracked instance, for update, replace and delete.
    pub id: Option<ResourceId>,
    /// Attributes to create with, for create and replace.
    pub desired: Option<ValidAttributes>,
    /// Changed mutable attributes, for update.
    pub changes: AttributeSet,
    /// Per-attribute details.
    pub details: Vec<DiffDetail>,
    /// Reason for this action.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionType {
    /// Delete a tracked instance.
    Delete,
    /// Delete then create under the same identifier lock.
    Replace,
    /// Create a new instance.
    Create,
    /// Update mutable attributes in place.
    Update,
}

impl ActionType {
    /// Returns true for actions that remove a remote instance.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Delete | Self::Replace)
    }
}

impl DeploymentPlan {
    /// Creates a new plan from a diff result.
    ///
    /// Actions are ordered deletes first, then replaces, creates and
    /// updates; within a type, by address.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, guardrails: &GuardrailsConfig, config_hash: &str) -> Self {
        let mut actions: Vec<PlannedAction> =
            diff.diffs.iter().filter_map(PlannedAction::from_diff).collect();
        actions.sort_by(|a, b| {
            a.action_type
                .cmp(&b.action_type)
                .then_with(|| a.addr.cmp(&b.addr))
        });

        Self::build(actions, guardrails, config_hash)
    }

    /// Creates a plan deleting every tracked instance.
    #[must_use]
    pub fn destroy(
        records: &[Arc<ResourceRecord>],
        guardrails: &GuardrailsConfig,
        config_hash: &str,
    ) -> Self {
        let actions = records
            .iter()
            .map(|record| PlannedAction {
                action_type: ActionType::Delete,
                addr: record.addr.clone(),
                id: Some(record.id.clone()),
                desired: None,
                changes: AttributeSet::new(),
                details: Vec::new(),
                reason: String::from("Destroy requested"),
            })
            .collect();

        Self::build(actions, guardrails, config_hash)
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: vec![],
            passes_guardrails: true,
            guardrail_violations: vec![],
        }
    }

    fn build(
        actions: Vec<PlannedAction>,
        guardrails: &GuardrailsConfig,
        config_hash: &str,
    ) -> Self {
        let guardrail_violations = Self::check_guardrails(guardrails, &actions);

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
            passes_guardrails: guardrail_violations.is_empty(),
            guardrail_violations,
        }
    }

    /// Checks guardrails for the plan.
    fn check_guardrails(guardrails: &GuardrailsConfig, actions: &[PlannedAction]) -> Vec<String> {
        let mut violations = Vec::new();
        let destructive: Vec<&PlannedAction> = actions
            .iter()
            .filter(|a| a.action_type.is_destructive())
            .collect();

        if guardrails.prevent_destroy {
            for action in &destructive {
                violations.push(format!(
                    "prevent_destroy forbids {} of {}",
                    action.action_type, action.addr
                ));
            }
        }

        if let Some(max) = guardrails.max_deletes {
            if destructive.len() > max {
                violations.push(format!(
                    "Plan deletes or replaces {} instance(s) but max_deletes is {max}",
                    destructive.len()
                ));
            }
        }

        violations
    }

    /// Fails if the plan violates a guardrail.
    ///
    /// # Errors
    ///
    /// Returns the list of violations.
    pub fn ensure_guardrails(&self) -> Result<()> {
        if self.passes_guardrails {
            Ok(())
        } else {
            Err(PlanError::GuardrailViolation {
                violations: self.guardrail_violations.clone(),
            }
            .into())
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Addresses of every action, in plan order.
    #[must_use]
    pub fn addrs(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.addr.to_string()).collect()
    }
}

impl PlannedAction {
    fn from_diff(diff: &ResourceDiff) -> Option<Self> {
        let (action_type, reason) = match diff.diff_type {
            DiffType::NoChange => return None,
            DiffType::Create => (ActionType::Create, String::from("Not tracked in state")),
            DiffType::Delete => (ActionType::Delete, String::from("Removed from configuration")),
            DiffType::Update => (
                ActionType::Update,
                Self::fields_reason("Changed", diff.details.iter()),
            ),
            DiffType::Replace => (
                ActionType::Replace,
                Self::fields_reason(
                    "Force-new change to",
                    diff.details.iter().filter(|d| d.forces_replacement),
                ),
            ),
        };

        Some(Self {
            action_type,
            addr: diff.addr.clone(),
            id: diff.id.clone(),
            desired: diff.desired.clone(),
            changes: diff.changes.clone(),
            details: diff.details.clone(),
            reason,
        })
    }

    fn fields_reason<'a>(prefix: &str, details: impl Iterator<Item = &'a DiffDetail>) -> String {
        let fields: Vec<&str> = details.map(|d| d.field.as_str()).collect();
        format!("{prefix} {}", fields.join(", "))
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.addr),
            ActionType::Update => format!("Update {} ({})", self.addr, self.changes),
            ActionType::Replace => format!("Replace {}", self.addr),
            ActionType::Delete => format!("Delete {}", self.addr),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.addr)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        if !self.guardrail_violations.is_empty() {
            writeln!(f, "\nGuardrail violations:")?;
            for violation in &self.guardrail_violations {
                writeln!(f, "  - {violation}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(name: &str, diff_type: DiffType) -> ResourceDiff {
        ResourceDiff {
            addr: ResourceAddr::new("api_cache", name),
            diff_type,
            id: Some(ResourceId::new(name)),
            desired: None,
            changes: AttributeSet::new(),
            details: vec![],
        }
    }

    fn result(diffs: Vec<ResourceDiff>) -> DiffResult {
        DiffResult {
            diffs,
            ..DiffResult::default()
        }
    }

    #[test]
    fn test_actions_are_ordered_deletes_first() {
        let diffs = result(vec![
            diff("d", DiffType::Update),
            diff("c", DiffType::Create),
            diff("b", DiffType::Replace),
            diff("a", DiffType::NoChange),
            diff("e", DiffType::Delete),
        ]);
        let plan = DeploymentPlan::from_diff(&diffs, &GuardrailsConfig::default(), "h");

        let order: Vec<ActionType> = plan.actions.iter().map(|a| a.action_type).collect();
        assert_eq!(
            order,
            vec![ActionType::Delete, ActionType::Replace, ActionType::Create, ActionType::Update]
        );
        assert!(plan.passes_guardrails);
    }

    #[test]
    fn test_prevent_destroy_blocks_replace() {
        let guardrails = GuardrailsConfig {
            prevent_destroy: true,
            max_deletes: None,
        };
        let plan = DeploymentPlan::from_diff(
            &result(vec![diff("a", DiffType::Replace), diff("b", DiffType::Create)]),
            &guardrails,
            "h",
        );

        assert!(!plan.passes_guardrails);
        assert_eq!(plan.guardrail_violations.len(), 1);
        assert!(plan.ensure_guardrails().is_err());
    }

    #[test]
    fn test_max_deletes() {
        let guardrails = GuardrailsConfig {
            prevent_destroy: false,
            max_deletes: Some(1),
        };
        let plan = DeploymentPlan::from_diff(
            &result(vec![diff("a", DiffType::Delete), diff("b", DiffType::Delete)]),
            &guardrails,
            "h",
        );
        assert!(!plan.passes_guardrails);

        let plan = DeploymentPlan::from_diff(
            &result(vec![diff("a", DiffType::Delete)]),
            &guardrails,
            "h",
        );
        assert!(plan.ensure_guardrails().is_ok());
    }

    #[test]
    fn test_destroy_plan() {
        let records = vec![Arc::new(ResourceRecord::new(
            ResourceAddr::new("api_cache", "a"),
            ResourceId::new("api-1"),
            AttributeSet::new(),
        ))];
        let plan = DeploymentPlan::destroy(&records, &GuardrailsConfig::default(), "h");

        assert_eq!(plan.count(ActionType::Delete), 1);
        assert_eq!(plan.actions[0].id, Some(ResourceId::new("api-1")));
    }

    #[test]
    fn test_empty_plan_display() {
        assert_eq!(DeploymentPlan::empty("h").to_string(), "No changes required");
    }
}
