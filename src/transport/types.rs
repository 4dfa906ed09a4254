//! Wire types for the API cache control plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which requests a cache serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiCachingBehavior {
    /// Cache every request.
    FullRequestCaching,
    /// Cache per resolver.
    PerResolverCaching,
}

impl ApiCachingBehavior {
    /// Accepted tokens, in canonical spelling.
    pub const TOKENS: &'static [&'static str] = &["FULL_REQUEST_CACHING", "PER_RESOLVER_CACHING"];

    /// Returns the wire token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FullRequestCaching => "FULL_REQUEST_CACHING",
            Self::PerResolverCaching => "PER_RESOLVER_CACHING",
        }
    }
}

impl fmt::Display for ApiCachingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiCachingBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL_REQUEST_CACHING" => Ok(Self::FullRequestCaching),
            "PER_RESOLVER_CACHING" => Ok(Self::PerResolverCaching),
            _ => Err(format!("unknown caching behavior: {s}")),
        }
    }
}

/// Instance size class of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiCacheType {
    /// Small.
    #[serde(rename = "SMALL")]
    Small,
    /// Medium.
    #[serde(rename = "MEDIUM")]
    Medium,
    /// Large.
    #[serde(rename = "LARGE")]
    Large,
    /// Extra large.
    #[serde(rename = "XLARGE")]
    XLarge,
    /// 2x large.
    #[serde(rename = "LARGE_2X")]
    Large2X,
    /// 4x large.
    #[serde(rename = "LARGE_4X")]
    Large4X,
    /// 8x large.
    #[serde(rename = "LARGE_8X")]
    Large8X,
    /// 12x large.
    #[serde(rename = "LARGE_12X")]
    Large12X,
}

impl ApiCacheType {
    /// All size classes, smallest first.
    pub const ALL: [Self; 8] = [
        Self::Small,
        Self::Medium,
        Self::Large,
        Self::XLarge,
        Self::Large2X,
        Self::Large4X,
        Self::Large8X,
        Self::Large12X,
    ];

    /// Accepted tokens, in canonical spelling.
    pub const TOKENS: &'static [&'static str] = &[
        "SMALL",
        "MEDIUM",
        "LARGE",
        "XLARGE",
        "LARGE_2X",
        "LARGE_4X",
        "LARGE_8X",
        "LARGE_12X",
    ];

    /// Returns the wire token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::XLarge => "XLARGE",
            Self::Large2X => "LARGE_2X",
            Self::Large4X => "LARGE_4X",
            Self::Large8X => "LARGE_8X",
            Self::Large12X => "LARGE_12X",
        }
    }
}

impl fmt::Display for ApiCacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiCacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown cache type: {s}"))
    }
}

/// Lifecycle status reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiCacheStatus {
    /// Serving.
    Available,
    /// Being created.
    Creating,
    /// Being deleted.
    Deleting,
    /// Being changed.
    Modifying,
    /// Being flushed.
    Flushing,
    /// Any status this client does not know.
    #[serde(other)]
    Unknown,
}

impl ApiCacheStatus {
    /// Returns the wire token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Creating => "CREATING",
            Self::Deleting => "DELETING",
            Self::Modifying => "MODIFYING",
            Self::Flushing => "FLUSHING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ApiCacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCache {
    /// Caching behavior.
    pub api_caching_behavior: ApiCachingBehavior,
    /// Time to live in seconds.
    pub ttl: i64,
    /// Size class.
    #[serde(rename = "type")]
    pub cache_type: ApiCacheType,
    /// Encryption at rest; omitted by the service when never set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_rest_encryption_enabled: Option<bool>,
    /// Encryption in transit; omitted by the service when never set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_encryption_enabled: Option<bool>,
    /// Current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApiCacheStatus>,
}

/// Request body for creating a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiCacheInput {
    /// Parent API id; carried in the path.
    #[serde(skip)]
    pub api_id: String,
    /// Caching behavior.
    pub api_caching_behavior: ApiCachingBehavior,
    /// Time to live in seconds.
    pub ttl: i64,
    /// Size class.
    #[serde(rename = "type")]
    pub cache_type: ApiCacheType,
    /// Encryption at rest, sent only when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_rest_encryption_enabled: Option<bool>,
    /// Encryption in transit, sent only when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transit_encryption_enabled: Option<bool>,
}

/// Request body for updating a cache.
///
/// The encryption flags cannot be changed in place and have no field here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiCacheInput {
    /// Parent API id; carried in the path.
    #[serde(skip)]
    pub api_id: String,
    /// New caching behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_caching_behavior: Option<ApiCachingBehavior>,
    /// New time to live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// New size class.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<ApiCacheType>,
}

impl UpdateApiCacheInput {
    /// Returns true if no setting would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.api_caching_behavior.is_none() && self.ttl.is_none() && self.cache_type.is_none()
    }
}

/// Response envelope carrying a cache.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiCacheEnvelope {
    pub api_cache: ApiCache,
}

/// Structured error body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "__type", alias = "errorType")]
    pub code: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_type_tokens_match_enum() {
        let tokens: Vec<_> = ApiCacheType::ALL.iter().map(ApiCacheType::as_str).collect();
        assert_eq!(tokens, ApiCacheType::TOKENS);
        assert_eq!("large_12x".parse::<ApiCacheType>(), Ok(ApiCacheType::Large12X));
        assert!("HUGE".parse::<ApiCacheType>().is_err());
    }

    #[test]
    fn test_update_input_has_no_encryption_fields() {
        let input = UpdateApiCacheInput {
            api_id: String::from("api-1"),
            ttl: Some(120),
            ..Default::default()
        };
        let json = serde_json::to_value(&input).expect("serialize");
        assert_eq!(json, serde_json::json!({ "ttl": 120 }));
    }

    #[test]
    fn test_cache_decodes_with_missing_flags_and_unknown_status() {
        let json = r#"{
            "apiCachingBehavior": "PER_RESOLVER_CACHING",
            "ttl": 300,
            "type": "LARGE_2X",
            "status": "REBOOTING"
        }"#;
        let cache: ApiCache = serde_json::from_str(json).expect("decode");
        assert_eq!(cache.cache_type, ApiCacheType::Large2X);
        assert_eq!(cache.at_rest_encryption_enabled, None);
        assert_eq!(cache.status, Some(ApiCacheStatus::Unknown));
    }
}
