//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{ActionType, DeploymentPlan};
use crate::reconciler::{DriftReport, ReconciliationResult, RefreshReport, StatusReport};
use crate::schema::ResourceSchema;
use crate::state::{DeploymentState, LockInfo, ResourceRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Tracked resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Address")]
    addr: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Schema attribute row for table display.
#[derive(Tabled)]
struct AttributeRow {
    #[tabled(rename = "Attribute")]
    name: String,
    #[tabled(rename = "Type")]
    attr_type: String,
    #[tabled(rename = "Required")]
    required: String,
    #[tabled(rename = "Mutability")]
    mutability: String,
    #[tabled(rename = "Default")]
    default: String,
    #[tabled(rename = "Constraint")]
    constraint: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn json<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!("{} No changes required, resources are up to date.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment Plan");
        let hash = ConfigHasher::new().short_hash(&plan.config_hash);
        let _ = writeln!(output, "   Config hash: {hash}\n");

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.addr.to_string(),
                reason: truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for action in &plan.actions {
                let _ = writeln!(output, "   {}", action.description());
                for detail in &action.details {
                    let _ = writeln!(output, "     {detail}");
                }
            }
        }

        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Replace).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red()
        );

        if !plan.passes_guardrails {
            let _ = writeln!(output, "\n{} Guardrail violations:", "⚠".yellow());
            for violation in &plan.guardrail_violations {
                let _ = writeln!(output, "   - {violation}");
            }
        }

        output
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => Self::json(result),
            OutputFormat::Text => {
                let status = if result.success {
                    format!("{} Reconciliation successful", "✓".green())
                } else {
                    format!("{} Reconciliation failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Replaced: {}", result.replaced);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                if result.attempts > 1 {
                    let _ = writeln!(output, "   Attempts: {}", result.attempts);
                }
                let _ = writeln!(output, "   State serial: {}", result.serial);

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected, state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for resource in &report.drifted {
                    let _ = writeln!(
                        output,
                        "   - {} ({}): {}",
                        resource.addr, resource.id, resource.drift
                    );
                }
                for addr in &report.pending {
                    let _ = writeln!(output, "   - {addr}: differs from configuration");
                }
                let _ = write!(
                    output,
                    "\n{}/{} tracked resources drifted remotely, {} pending change(s).\n",
                    report.drifted.len(),
                    report.total_tracked,
                    report.pending.len()
                );
                output
            }
        }
    }

    /// Formats a refresh report.
    #[must_use]
    pub fn format_refresh(&self, report: &RefreshReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Refreshed {} resource(s)\n",
                    "✓".green(),
                    report.refreshed
                );
                for resource in &report.drifted {
                    let _ = writeln!(output, "   - {}: {}", resource.addr, resource.drift);
                }
                output
            }
        }
    }

    /// Formats a status report.
    #[must_use]
    pub fn format_status(&self, status: &StatusReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(status),
            OutputFormat::Text => Self::format_status_text(status),
        }
    }

    fn format_status_text(status: &StatusReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\nProject: {} ({} state)\n", status.project, status.backend);

        if status.resources.is_empty() {
            output.push_str("   No resources tracked.\n");
        } else {
            output.push_str(&Self::resource_table(&status.resources));
            output.push('\n');
        }

        if let Some(serial) = status.serial {
            let _ = writeln!(output, "\n   State serial: {serial}");
        }
        let config = if status.config_changed {
            "changed since last apply".yellow().to_string()
        } else {
            "applied".green().to_string()
        };
        let _ = writeln!(output, "   Configuration: {config}");

        for addr in &status.untracked {
            let _ = writeln!(output, "   {} {addr} not created yet", "+".green());
        }
        for addr in &status.orphaned {
            let _ = writeln!(output, "   {} {addr} no longer configured", "-".red());
        }

        if let Some(lock) = &status.lock {
            let _ = writeln!(output, "   {} Locked: {lock}", "⚠".yellow());
        }
        if let Some(run) = &status.last_run {
            let mark = if run.success { "✓".green() } else { "✗".red() };
            let _ = writeln!(
                output,
                "   Last run: {mark} {} at {}",
                run.operation,
                run.timestamp.format("%Y-%m-%d %H:%M")
            );
        }

        output
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => Self::json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = writeln!(output, "\nState: {}/{}\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let hash = ConfigHasher::new().short_hash(&state.config_hash);
                let _ = writeln!(output, "   Config hash: {hash}");
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", state.resources.len());

                if !state.resources.is_empty() {
                    let records: Vec<ResourceRecord> = state.resources.values().cloned().collect();
                    output.push_str(&Self::resource_table(&records));
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the result of configuration validation.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid\n", "✓".green())
                } else {
                    format!("{} Configuration is invalid\n", "✗".red())
                };
                for issue in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", issue.field, issue.message);
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats one schema, or the list of kinds.
    #[must_use]
    pub fn format_schemas(&self, schemas: &[&ResourceSchema]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(schemas),
            OutputFormat::Text => {
                let mut output = String::new();
                for schema in schemas {
                    let _ = writeln!(
                        output,
                        "\n{} (v{}): {}",
                        schema.kind().bold(),
                        schema.version(),
                        schema.description()
                    );
                    if let Some(identity) = schema.identity() {
                        let _ = writeln!(output, "   Identified by: {identity}");
                    }
                    let force_new: Vec<&str> = schema.force_new_attributes().collect();
                    if !force_new.is_empty() {
                        let force_new = force_new.join(", ");
                        let _ = writeln!(output, "   Replaced when changed: {force_new}");
                    }
                    let rows: Vec<AttributeRow> = schema
                        .attributes()
                        .iter()
                        .map(|def| AttributeRow {
                            name: def.name.to_string(),
                            attr_type: def.attr_type.to_string(),
                            required: if def.required { "yes" } else { "no" }.to_string(),
                            mutability: def.mutability.to_string(),
                            default: def
                                .default
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            constraint: def.constraint.map(|c| c.to_string()).unwrap_or_default(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats an imported record.
    #[must_use]
    pub fn format_import(&self, record: &ResourceRecord) -> String {
        match self.format {
            OutputFormat::Json => Self::json(record),
            OutputFormat::Text => format!(
                "{} Imported {} ({})\n   {}\n",
                "✓".green(),
                record.addr,
                record.id,
                record.attributes
            ),
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => Self::json(lock),
            OutputFormat::Text => format!("{} State locked: {lock}\n", "✓".green()),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                Self::json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => text.to_string(),
        }
    }

    fn resource_table(records: &[ResourceRecord]) -> String {
        let rows: Vec<ResourceRow> = records
            .iter()
            .map(|r| ResourceRow {
                addr: r.addr.to_string(),
                id: truncate(r.id.as_str(), 24),
                status: r
                    .attributes
                    .get_str("status")
                    .map_or_else(|| "-".dimmed().to_string(), ToString::to_string),
                observed: r.observed_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Replace => "-/+replace".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    passes_guardrails: bool,
    guardrail_violations: Vec<String>,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    id: Option<String>,
    reason: String,
    changes: Vec<String>,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            replaces: plan.count(ActionType::Replace),
            deletes: plan.count(ActionType::Delete),
            passes_guardrails: plan.passes_guardrails,
            guardrail_violations: plan.guardrail_violations.clone(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.addr.to_string(),
                    id: a.id.as_ref().map(ToString::to_string),
                    reason: a.reason.clone(),
                    changes: a.details.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}
