//! Attribute definitions and value constraints.

use serde::Serialize;
use std::fmt;

use crate::error::ValidationError;

use super::value::{AttributeType, AttributeValue};

/// How an attribute may change after the instance exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Changed in place through an update.
    Mutable,
    /// Changing it requires deleting and recreating the instance.
    ForceNew,
    /// Set by the remote side only.
    Computed,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mutable => "mutable",
            Self::ForceNew => "force-new",
            Self::Computed => "computed",
        };
        write!(f, "{s}")
    }
}

/// Constraint a value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Value must be one of a fixed token set.
    OneOf {
        /// Allowed tokens in their canonical spelling.
        allowed: &'static [&'static str],
        /// Whether tokens match case-insensitively.
        ignore_case: bool,
    },
    /// Integer value within an inclusive range.
    IntRange {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },
    /// String made only of ASCII letters, digits, `-` and `_`.
    Identifier,
}

impl Constraint {
    /// Checks a value, returning it in canonical form.
    ///
    /// Enumerated tokens are rewritten to the allowed spelling so that
    /// `full_request_caching` and `FULL_REQUEST_CACHING` compare equal later.
    ///
    /// # Errors
    ///
    /// Returns the violation if the value does not satisfy the constraint.
    pub fn check(
        self,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<AttributeValue, ValidationError> {
        match self {
            Self::OneOf { allowed, ignore_case } => {
                let Some(s) = value.as_str() else {
                    return Err(mismatch(attribute, AttributeType::Enum, &value));
                };
                allowed
                    .iter()
                    .find(|token| {
                        if ignore_case {
                            token.eq_ignore_ascii_case(s)
                        } else {
                            **token == s
                        }
                    })
                    .map(|token| AttributeValue::from(*token))
                    .ok_or_else(|| ValidationError::NotInSet {
                        attribute: attribute.to_string(),
                        value: s.to_string(),
                        allowed: allowed.join(", "),
                    })
            }
            Self::IntRange { min, max } => {
                let Some(n) = value.as_int() else {
                    return Err(mismatch(attribute, AttributeType::Int, &value));
                };
                if (min..=max).contains(&n) {
                    Ok(value)
                } else {
                    Err(ValidationError::OutOfRange {
                        attribute: attribute.to_string(),
                        value: n,
                        min,
                        max,
                    })
                }
            }
            Self::Identifier => match value.as_str() {
                Some(s) if s.chars().all(is_identifier_char) => Ok(value),
                Some(s) => Err(ValidationError::InvalidCharacters {
                    attribute: attribute.to_string(),
                    value: s.to_string(),
                }),
                None => Err(mismatch(attribute, AttributeType::String, &value)),
            },
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneOf { allowed, ignore_case } => {
                write!(f, "one of {}", allowed.join("|"))?;
                if *ignore_case {
                    write!(f, " (any case)")?;
                }
                Ok(())
            }
            Self::IntRange { min, max } => write!(f, "{min}..={max}"),
            Self::Identifier => write!(f, "[A-Za-z0-9_-]"),
        }
    }
}

/// Definition of one attribute in a resource schema.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: &'static str,
    /// Declared type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Whether the attribute must be supplied.
    pub required: bool,
    /// How the attribute may change.
    pub mutability: Mutability,
    /// Value assumed when the attribute is not supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<AttributeValue>,
    /// Constraint on the value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    /// Human-readable description.
    pub description: &'static str,
}

impl AttributeDef {
    /// A required, mutable attribute.
    #[must_use]
    pub const fn required(name: &'static str, attr_type: AttributeType) -> Self {
        Self::build(name, attr_type, true, Mutability::Mutable)
    }

    /// An optional, mutable attribute.
    #[must_use]
    pub const fn optional(name: &'static str, attr_type: AttributeType) -> Self {
        Self::build(name, attr_type, false, Mutability::Mutable)
    }

    /// An attribute only the remote side sets.
    #[must_use]
    pub const fn computed(name: &'static str, attr_type: AttributeType) -> Self {
        Self::build(name, attr_type, false, Mutability::Computed)
    }

    const fn build(
        name: &'static str,
        attr_type: AttributeType,
        required: bool,
        mutability: Mutability,
    ) -> Self {
        Self {
            name,
            attr_type,
            required,
            mutability,
            default: None,
            constraint: None,
            description: "",
        }
    }

    /// Marks the attribute as requiring replacement when changed.
    #[must_use]
    pub fn force_new(mut self) -> Self {
        self.mutability = Mutability::ForceNew;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Returns true if the remote side owns the value.
    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(self.mutability, Mutability::Computed)
    }

    /// Returns true if a change forces replacement.
    #[must_use]
    pub const fn is_force_new(&self) -> bool {
        matches!(self.mutability, Mutability::ForceNew)
    }

    /// Validates a value against this definition.
    ///
    /// Integers and booleans written as strings (for instance quoted in YAML)
    /// are coerced to the declared type. The returned value is normalized.
    ///
    /// # Errors
    ///
    /// Returns the violation when the value has the wrong type or breaks the
    /// constraint.
    pub fn validate(&self, value: &AttributeValue) -> Result<AttributeValue, ValidationError> {
        let typed = match (self.attr_type, value) {
            (AttributeType::Bool, AttributeValue::Bool(_))
            | (AttributeType::Int, AttributeValue::Int(_))
            | (AttributeType::String | AttributeType::Enum, AttributeValue::String(_)) => {
                value.clone()
            }
            (AttributeType::Int, AttributeValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|_| mismatch(self.name, self.attr_type, value))?,
            (AttributeType::Bool, AttributeValue::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => AttributeValue::Bool(true),
                    "false" => AttributeValue::Bool(false),
                    _ => return Err(mismatch(self.name, self.attr_type, value)),
                }
            }
            _ => return Err(mismatch(self.name, self.attr_type, value)),
        };

        if self.required && typed.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Err(ValidationError::Empty {
                attribute: self.name.to_string(),
            });
        }

        match self.constraint {
            Some(constraint) => constraint.check(self.name, typed),
            None => Ok(typed),
        }
    }
}

const fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn mismatch(attribute: &str, expected: AttributeType, found: &AttributeValue) -> ValidationError {
    ValidationError::TypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: &[&str] = &["SMALL", "LARGE"];

    #[test]
    fn test_one_of_is_case_insensitive_and_canonical() {
        let def =
            AttributeDef::required("type", AttributeType::Enum).with_constraint(Constraint::OneOf {
                allowed: SIZES,
                ignore_case: true,
            });

        assert_eq!(def.validate(&"large".into()), Ok(AttributeValue::from("LARGE")));
        assert!(matches!(
            def.validate(&"HUGE".into()),
            Err(ValidationError::NotInSet { .. })
        ));
    }

    #[test]
    fn test_one_of_case_sensitive() {
        let def =
            AttributeDef::required("type", AttributeType::Enum).with_constraint(Constraint::OneOf {
                allowed: SIZES,
                ignore_case: false,
            });

        assert!(def.validate(&"SMALL".into()).is_ok());
        assert!(def.validate(&"small".into()).is_err());
    }

    #[test]
    fn test_int_coercion_from_string() {
        let def = AttributeDef::required("ttl", AttributeType::Int)
            .with_constraint(Constraint::IntRange { min: 1, max: 10 });

        assert_eq!(def.validate(&"7".into()), Ok(AttributeValue::Int(7)));
        assert!(matches!(
            def.validate(&"seven".into()),
            Err(ValidationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            def.validate(&"11".into()),
            Err(ValidationError::OutOfRange { value: 11, .. })
        ));
    }

    #[test]
    fn test_bool_rejects_int() {
        let def = AttributeDef::optional("flag", AttributeType::Bool);
        assert!(def.validate(&AttributeValue::Int(1)).is_err());
        assert_eq!(def.validate(&"TRUE".into()), Ok(AttributeValue::Bool(true)));
    }

    #[test]
    fn test_required_string_must_not_be_blank() {
        let def = AttributeDef::required("api_id", AttributeType::String);
        assert!(matches!(
            def.validate(&"   ".into()),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn test_identifier_rejects_path_characters() {
        let def = AttributeDef::required("api_id", AttributeType::String)
            .with_constraint(Constraint::Identifier);

        assert!(def.validate(&"abc-123_x".into()).is_ok());
        for bad in ["other-api/ApiCache?x=", "a#b", "a b"] {
            assert!(matches!(
                def.validate(&bad.into()),
                Err(ValidationError::InvalidCharacters { .. })
            ));
        }
    }
}
