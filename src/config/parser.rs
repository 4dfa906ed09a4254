//! Configuration loading.
//!
//! Configuration comes from a YAML file, optionally overridden by
//! `APICACHE_*` environment variables, which may themselves come from a
//! `.env` file next to the configuration.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Environment variable holding the control-plane bearer token.
pub const API_TOKEN_VAR: &str = "APICACHE_API_TOKEN";

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = match (source, e.location()) {
                (Some(path), Some(at)) => {
                    Some(format!("{}:{}:{}", path.display(), at.line(), at.column()))
                }
                (Some(path), None) => Some(path.display().to_string()),
                (None, Some(at)) => Some(format!("line {}, column {}", at.line(), at.column())),
                (None, None) => None,
            };
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!(
            "Parsed configuration for {} with {} resource(s)",
            config.qualified_name(),
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration and applies `APICACHE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the control-plane token, if configured.
    #[must_use]
    pub fn api_token() -> Option<String> {
        std::env::var(API_TOKEN_VAR).ok().filter(|t| !t.is_empty())
    }
}

/// Applies overrides read through `lookup`.
///
/// Recognized names: `APICACHE_PROJECT_NAME`, `APICACHE_PROJECT_ENVIRONMENT`,
/// `APICACHE_STATE_BUCKET`, `APICACHE_STATE_PREFIX` and `APICACHE_ENDPOINT`.
pub fn apply_overrides(config: &mut DeployConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(name) = lookup("APICACHE_PROJECT_NAME") {
        debug!("Overriding project.name from environment");
        config.project.name = name;
    }

    if let Some(env) = lookup("APICACHE_PROJECT_ENVIRONMENT") {
        debug!("Overriding project.environment from environment");
        config.project.environment = env;
    }

    if let Some(bucket) = lookup("APICACHE_STATE_BUCKET") {
        debug!("Overriding state.bucket from environment");
        config.state.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("APICACHE_STATE_PREFIX") {
        debug!("Overriding state.prefix from environment");
        config.state.prefix = Some(prefix);
    }

    if let Some(endpoint) = lookup("APICACHE_ENDPOINT") {
        debug!("Overriding transport.endpoint from environment");
        config.transport.endpoint = endpoint;
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "apicache.deploy.yaml",
    "apicache.deploy.yml",
    "deploy.yaml",
    "deploy.yml",
];

/// Finds the configuration file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::error::DeployError;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FULL: &str = r#"
project:
  name: storefront
  environment: prod

state:
  backend: s3
  bucket: infra-state
  prefix: storefront/prod

engine:
  parallelism: 8
  max_attempts: 2

transport:
  endpoint: https://control.example.com
  timeout_secs: 10

guardrails:
  prevent_destroy: true

resources:
  - kind: api_cache
    name: primary
    attributes:
      api_id: abc123
      api_caching_behavior: FULL_REQUEST_CACHING
      ttl: "3600"
      type: large
      at_rest_encryption_enabled: true
"#;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.engine.parallelism, 4);
        assert_eq!(config.engine.max_attempts, 1);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = ConfigParser::new().parse_yaml(FULL, None).expect("valid yaml");

        assert_eq!(config.qualified_name(), "storefront-prod");
        assert_eq!(config.engine.parallelism, 8);
        assert_eq!(config.transport.timeout_secs, 10);
        assert!(config.guardrails().prevent_destroy);

        let cache = &config.resources[0];
        assert_eq!(cache.addr().to_string(), "api_cache.primary");
        assert_eq!(cache.attributes.get_str("ttl"), Some("3600"));
        assert_eq!(cache.attributes.get_bool("at_rest_encryption_enabled"), Some(true));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("bad.yaml")))
            .expect_err("invalid yaml");
        match err {
            DeployError::Config(ConfigError::ParseError { location, .. }) => {
                assert!(location.is_some_and(|l| l.starts_with("bad.yaml")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = ConfigParser::new().parse_yaml(FULL, None).expect("valid yaml");
        let vars: HashMap<&str, &str> = [
            ("APICACHE_PROJECT_ENVIRONMENT", "staging"),
            ("APICACHE_STATE_BUCKET", "other-bucket"),
            ("APICACHE_ENDPOINT", "http://127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();

        apply_overrides(&mut config, |name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.project.name, "storefront");
        assert_eq!(config.project.environment, "staging");
        assert_eq!(config.state.bucket.as_deref(), Some("other-bucket"));
        assert_eq!(config.state.prefix.as_deref(), Some("storefront/prod"));
        assert_eq!(config.transport.endpoint, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        std::fs::write(temp.path().join("apicache.deploy.yaml"), "project: {name: x}")
            .expect("write");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("apicache.deploy.yaml"));
    }
}
