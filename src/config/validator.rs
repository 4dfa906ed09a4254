//! Configuration validation for deployment specs.
//!
//! Checks everything that can be checked without talking to the control
//! plane: project naming, backend settings, engine and transport ranges, and
//! every resource against the schema of its kind.

use crate::error::{ConfigError, DeployError, Result};
use crate::provider::builtin_schemas;
use crate::schema::ResourceSchema;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;
use validator::Validate;

use super::spec::{DeployConfig, ProjectConfig, ResourceConfig, StateBackend, StateConfig};

/// Validator for deployment configurations.
#[derive(Debug)]
pub struct ConfigValidator {
    schemas: BTreeMap<&'static str, ResourceSchema>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Creates a validator that knows every built-in kind.
    #[must_use]
    pub fn new() -> Self {
        Self::with_schemas(builtin_schemas())
    }

    /// Creates a validator for an explicit set of kinds.
    #[must_use]
    pub fn with_schemas(schemas: impl IntoIterator<Item = ResourceSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.kind(), s)).collect(),
        }
    }

    /// Validates a deployment configuration, collecting every problem.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_ranges("engine", config.engine.validate(), &mut result);
        Self::validate_ranges("transport", config.transport.validate(), &mut result);
        self.validate_resources(&config.resources, &mut result);
        Self::validate_guardrails(config, &mut result);

        result
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found; warnings never fail validation.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first) => Err(DeployError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            })),
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result
                .errors
                .push(ValidationIssue::new("project.name", "Project name cannot be empty"));
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationIssue::new(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            ));
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationIssue::new(
                "project.environment",
                "Environment cannot be empty",
            ));
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationIssue::new(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    ));
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket: ignored by the local backend"));
                }
            }
        }
    }

    fn validate_ranges(
        section: &str,
        outcome: std::result::Result<(), validator::ValidationErrors>,
        result: &mut ValidationResult,
    ) {
        let Err(errors) = outcome else {
            return;
        };

        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        for (field, field_errors) in fields {
            for error in field_errors {
                let message = match &error.message {
                    Some(message) => message.to_string(),
                    None => format!("failed '{}' check", error.code),
                };
                result
                    .errors
                    .push(ValidationIssue::new(format!("{section}.{field}"), message));
            }
        }
    }

    fn validate_resources(&self, resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        let mut seen_addrs = HashSet::new();
        let mut identities: HashMap<(&str, String), String> = HashMap::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            let addr = resource.addr();

            if !seen_addrs.insert(addr.clone()) {
                result.errors.push(ValidationIssue::new(
                    format!("{prefix}.name"),
                    format!("Duplicate resource: {addr}"),
                ));
            }

            if !is_valid_resource_name(&resource.name) {
                result.errors.push(ValidationIssue::new(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must start with a lowercase letter \
                         and contain only lowercase alphanumerics, '-' or '_'.",
                        resource.name
                    ),
                ));
            }

            let Some(schema) = self.schemas.get(resource.kind.as_str()) else {
                result.errors.push(ValidationIssue::new(
                    format!("{prefix}.kind"),
                    format!("Unknown resource kind '{}'", resource.kind),
                ));
                continue;
            };

            match schema.validate(&resource.attributes) {
                Ok(valid) => {
                    let Some(identity) = schema.identity() else {
                        continue;
                    };
                    let Some(id) = valid.get_str(identity) else {
                        continue;
                    };
                    let key = (schema.kind(), id.to_string());
                    if let Some(first) = identities.get(&key) {
                        result.errors.push(ValidationIssue::new(
                            format!("{prefix}.attributes.{identity}"),
                            format!("{addr} manages the same {} '{id}' as {first}", schema.kind()),
                        ));
                    } else {
                        identities.insert(key, addr.to_string());
                    }
                }
                Err(errors) => {
                    for error in errors.errors {
                        result.errors.push(ValidationIssue::new(
                            format!("{prefix}.attributes.{}", error.attribute()),
                            error.to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn validate_guardrails(config: &DeployConfig, result: &mut ValidationResult) {
        let Some(guardrails) = &config.guardrails else {
            return;
        };

        if guardrails.max_deletes == Some(0) && !guardrails.prevent_destroy {
            result.warnings.push(String::from(
                "guardrails.max_deletes: 0 blocks every delete; \
                 prevent_destroy says this more plainly",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Resource names also allow underscores.
fn is_valid_resource_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
