//! Resource schema descriptors.
//!
//! A [`ResourceSchema`] lists the attributes a resource kind accepts. The
//! only way to obtain [`ValidAttributes`] is [`ResourceSchema::validate`],
//! so nothing that failed validation can reach a remote call.

use serde::Serialize;
use std::ops::Deref;

use crate::error::{ValidationError, ValidationErrors};

use super::attribute::AttributeDef;
use super::value::{AttributeSet, AttributeValue};

/// Declarative description of a resource kind.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSchema {
    kind: &'static str,
    version: u32,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<&'static str>,
    attributes: Vec<AttributeDef>,
}

impl ResourceSchema {
    /// Creates a schema with no attributes.
    #[must_use]
    pub const fn new(kind: &'static str, version: u32, description: &'static str) -> Self {
        Self {
            kind,
            version,
            description,
            identity: None,
            attributes: Vec::new(),
        }
    }

    /// Names the attribute whose value becomes the remote identifier.
    ///
    /// Kinds whose identity is inherited from a parent object declare it
    /// here, so the identifier is known before the instance is created.
    #[must_use]
    pub fn with_identity(mut self, attribute: &'static str) -> Self {
        self.identity = Some(attribute);
        self
    }

    /// Attribute carrying the remote identifier, if declared.
    #[must_use]
    pub const fn identity(&self) -> Option<&'static str> {
        self.identity
    }

    /// Adds an attribute definition.
    #[must_use]
    pub fn with_attribute(mut self, def: AttributeDef) -> Self {
        self.attributes.push(def);
        self
    }

    /// Resource kind this schema describes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Schema version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }

    /// All attribute definitions in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Looks up an attribute definition by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Names of attributes whose change forces replacement.
    pub fn force_new_attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes.iter().filter(|a| a.is_force_new()).map(|a| a.name)
    }

    /// Validates a configured attribute set.
    ///
    /// Every violation is collected before returning, so the operator sees
    /// the whole list at once. Accepted values are normalized (coerced to the
    /// declared type and enum tokens canonicalized).
    ///
    /// # Errors
    ///
    /// Returns all violations if any attribute is unknown, computed, missing,
    /// mistyped, or outside its constraint.
    pub fn validate(&self, input: &AttributeSet) -> Result<ValidAttributes, ValidationErrors> {
        let mut errors = Vec::new();
        let mut accepted = AttributeSet::new();

        for name in input.names() {
            match self.attribute(name) {
                None => errors.push(ValidationError::UnknownAttribute {
                    kind: self.kind.to_string(),
                    attribute: name.to_string(),
                }),
                Some(def) if def.is_computed() => errors.push(ValidationError::Computed {
                    attribute: name.to_string(),
                }),
                Some(_) => {}
            }
        }

        for def in &self.attributes {
            if def.is_computed() {
                continue;
            }
            match input.get(def.name) {
                Some(value) => match def.validate(value) {
                    Ok(normalized) => accepted.insert(def.name, normalized),
                    Err(e) => errors.push(e),
                },
                None if def.required => errors.push(ValidationError::MissingRequired {
                    attribute: def.name.to_string(),
                }),
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(ValidAttributes(accepted))
        } else {
            Err(ValidationErrors {
                kind: self.kind.to_string(),
                resource: None,
                errors,
            })
        }
    }

    /// Value of an attribute, falling back to its declared default.
    #[must_use]
    pub fn effective<'a>(
        &'a self,
        name: &str,
        set: &'a AttributeSet,
    ) -> Option<&'a AttributeValue> {
        set.get(name)
            .or_else(|| self.attribute(name).and_then(|def| def.default.as_ref()))
    }

    /// Copy of `set` with declared defaults written out for unset attributes.
    #[must_use]
    pub fn fill_defaults(&self, set: &AttributeSet) -> AttributeSet {
        let mut filled = set.clone();
        for def in self.attributes.iter().filter(|def| !set.contains(def.name)) {
            if let Some(default) = &def.default {
                filled.insert(def.name, default.clone());
            }
        }
        filled
    }
}

/// An attribute set that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidAttributes(AttributeSet);

impl ValidAttributes {
    /// Borrows the underlying set.
    #[must_use]
    pub const fn as_set(&self) -> &AttributeSet {
        &self.0
    }

    /// Unwraps the underlying set.
    #[must_use]
    pub fn into_inner(self) -> AttributeSet {
        self.0
    }
}

impl Deref for ValidAttributes {
    type Target = AttributeSet;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, Constraint};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("widget", 1, "test widget")
            .with_attribute(AttributeDef::required("parent", AttributeType::String).force_new())
            .with_attribute(
                AttributeDef::required("size", AttributeType::Int)
                    .with_constraint(Constraint::IntRange { min: 1, max: 10 }),
            )
            .with_attribute(
                AttributeDef::optional("shiny", AttributeType::Bool).with_default(false),
            )
            .with_attribute(AttributeDef::computed("status", AttributeType::String))
    }

    #[test]
    fn test_validate_accepts_and_normalizes() {
        let input = AttributeSet::new().with("parent", "p-1").with("size", "4");
        let valid = schema().validate(&input).expect("valid");

        assert_eq!(valid.get_int("size"), Some(4));
        assert_eq!(valid.get_str("parent"), Some("p-1"));
        assert!(!valid.contains("shiny"));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let input = AttributeSet::new()
            .with("size", 0)
            .with("colour", "red")
            .with("status", "AVAILABLE");
        let errors = schema().validate(&input).expect_err("invalid");

        assert_eq!(errors.errors.len(), 4);
        assert!(errors.mentions("parent"));
        assert!(errors.mentions("size"));
        assert!(errors.mentions("colour"));
        assert!(errors.mentions("status"));
    }

    #[test]
    fn test_effective_uses_default() {
        let schema = schema();
        let set = AttributeSet::new();
        assert_eq!(schema.effective("shiny", &set), Some(&AttributeValue::Bool(false)));
        assert_eq!(schema.effective("parent", &set), None);
    }

    #[test]
    fn test_force_new_attributes() {
        let names: Vec<_> = schema().force_new_attributes().collect();
        assert_eq!(names, vec!["parent"]);
    }

    #[test]
    fn test_fill_defaults_keeps_explicit_values() {
        let schema = schema();
        let filled = schema.fill_defaults(&AttributeSet::new().with("parent", "p"));
        assert_eq!(filled.get_bool("shiny"), Some(false));
        assert_eq!(filled.get_str("parent"), Some("p"));
        assert!(!filled.contains("size"));

        let explicit = schema.fill_defaults(&AttributeSet::new().with("shiny", true));
        assert_eq!(explicit.get_bool("shiny"), Some(true));
    }
}
