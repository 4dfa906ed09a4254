//! Deployment configuration types.
//!
//! These structs map to `apicache.deploy.yaml` and fully describe the desired
//! state plus how the engine should reach it.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::resource::ResourceAddr;
use crate::schema::AttributeSet;

/// Root of the deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Control-plane connection.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Optional guardrails.
    #[serde(default)]
    pub guardrails: Option<GuardrailsConfig>,
    /// Desired resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region; the AWS default is used when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Local state file path, relative to the configuration file.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Maximum instances processed at once.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 64))]
    pub parallelism: usize,
    /// Diff/plan/execute passes before giving up on failed actions.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// Seconds to wait between passes.
    #[serde(default = "default_attempt_delay")]
    #[validate(range(max = 600))]
    pub attempt_delay_secs: u64,
    /// Re-read tracked instances before diffing.
    #[serde(default = "default_true")]
    pub refresh: bool,
    /// Stop starting new instances after the first failure.
    #[serde(default)]
    pub fail_fast: bool,
}

/// Control-plane transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct TransportConfig {
    /// Base URL of the control-plane API.
    #[serde(default = "default_endpoint")]
    #[validate(url)]
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,
    /// Retries of transient failures after the first attempt.
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,
    /// Base delay between retries; grows linearly.
    #[serde(default = "default_retry_delay")]
    #[validate(range(max = 60_000))]
    pub retry_delay_ms: u64,
}

/// Guardrails on destructive changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardrailsConfig {
    /// Refuse any plan that deletes or replaces an instance.
    #[serde(default)]
    pub prevent_destroy: bool,
    /// Maximum deletes and replaces in one plan.
    #[serde(default)]
    pub max_deletes: Option<usize>,
}

/// One desired resource instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Resource kind, e.g. `api_cache`.
    pub kind: String,
    /// Local name, unique within the kind.
    pub name: String,
    /// Desired attributes, validated against the kind's schema.
    #[serde(default)]
    pub attributes: AttributeSet,
}

const fn default_parallelism() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    1
}

const fn default_attempt_delay() -> u64 {
    5
}

const fn default_true() -> bool {
    true
}

const fn default_timeout() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    1000
}

fn default_endpoint() -> String {
    String::from("http://localhost:8080")
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            attempt_delay_secs: default_attempt_delay(),
            refresh: true,
            fail_fast: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl DeployConfig {
    /// Returns the project name qualified by environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Addresses of every configured resource, in file order.
    #[must_use]
    pub fn resource_addrs(&self) -> Vec<ResourceAddr> {
        self.resources.iter().map(ResourceConfig::addr).collect()
    }

    /// Guardrails, or the permissive defaults.
    #[must_use]
    pub fn guardrails(&self) -> GuardrailsConfig {
        self.guardrails.clone().unwrap_or_default()
    }
}

impl ResourceConfig {
    /// Local address of this resource.
    #[must_use]
    pub fn addr(&self) -> ResourceAddr {
        ResourceAddr::new(self.kind.as_str(), self.name.as_str())
    }
}
