//! Configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `apicache.deploy.yaml`
//! - Validation of configuration values and resource attributes
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    apply_overrides, find_config_file, ConfigParser, API_TOKEN_VAR, DEFAULT_CONFIG_FILES,
};
pub use spec::{
    DeployConfig, EngineConfig, GuardrailsConfig, ProjectConfig, ResourceConfig, StateBackend,
    StateConfig, TransportConfig,
};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
