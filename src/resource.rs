//! Resource identity and lifecycle types.
//!
//! A resource instance has two names: the local address the operator gives
//! it in configuration (`kind.name`) and the identifier the remote side
//! knows it by. For API caches the identifier is inherited from the parent
//! API, so at most one cache exists per API.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::ValidAttributes;

/// Local address of a resource instance, rendered as `kind.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddr {
    /// Resource kind (schema name).
    pub kind: String,
    /// Operator-chosen name, unique within the kind.
    pub name: String,
}

impl ResourceAddr {
    /// Creates a new address.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parses an address of the form `kind.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is missing.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => Ok(Self::new(kind, name)),
            _ => Err(format!("Invalid resource address: {s}. Expected format: KIND.NAME")),
        }
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceAddr {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceAddr> for String {
    fn from(addr: ResourceAddr) -> Self {
        addr.to_string()
    }
}

impl std::str::FromStr for ResourceAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a resource instance on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wraps an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A validated desired resource from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredResource {
    /// Local address.
    pub addr: ResourceAddr,
    /// Attributes that passed schema validation.
    pub attributes: ValidAttributes,
}

/// Lifecycle state of a single resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Not present remotely (or not tracked).
    Absent,
    /// A create call is in flight.
    Creating,
    /// Present remotely and tracked.
    Present,
    /// An update call is in flight.
    Updating,
    /// A delete call is in flight.
    Deleting,
}

impl InstanceState {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    ///
    /// `Present -> Absent` is the forced transition taken when a read
    /// reports the instance missing.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Absent, Self::Creating)
                | (Self::Creating, Self::Present | Self::Absent)
                | (Self::Present, Self::Updating | Self::Deleting | Self::Absent)
                | (Self::Updating, Self::Present | Self::Absent)
                | (Self::Deleting, Self::Absent | Self::Present)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Present => "present",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_parse_and_display() {
        let addr = ResourceAddr::parse("api_cache.primary").expect("valid address");
        assert_eq!(addr.kind, "api_cache");
        assert_eq!(addr.name, "primary");
        assert_eq!(addr.to_string(), "api_cache.primary");
    }

    #[test]
    fn test_addr_parse_invalid() {
        assert!(ResourceAddr::parse("primary").is_err());
        assert!(ResourceAddr::parse(".primary").is_err());
        assert!(ResourceAddr::parse("api_cache.").is_err());
    }

    #[test]
    fn test_addr_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(ResourceAddr::new("api_cache", "primary"), 1);

        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"api_cache.primary":1}"#);

        let back: std::collections::BTreeMap<ResourceAddr, i32> =
            serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }

    #[test]
    fn test_lifecycle_edges() {
        use InstanceState::{Absent, Creating, Deleting, Present, Updating};

        assert!(Absent.can_transition_to(Creating));
        assert!(Creating.can_transition_to(Present));
        assert!(Present.can_transition_to(Updating));
        assert!(Updating.can_transition_to(Present));
        assert!(Present.can_transition_to(Deleting));
        assert!(Deleting.can_transition_to(Absent));
        assert!(Present.can_transition_to(Absent));

        assert!(!Absent.can_transition_to(Present));
        assert!(!Absent.can_transition_to(Updating));
        assert!(!Creating.can_transition_to(Updating));
    }
}
