//! Configuration parser for loading declaration files.
//!
//! This module handles loading configuration from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StratusError};
use std::path::Path;
use tracing::{debug, info};

use super::spec::StratusConfig;

/// Configuration parser for loading resource declarations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StratusConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StratusError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratusError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StratusConfig> {
        debug!("Parsing YAML configuration");

        let config: StratusConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StratusError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project '{}' with {} resources",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `STRATUS_<SECTION>_<KEY>` (e.g., `STRATUS_PROJECT_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StratusConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut StratusConfig) {
        if let Ok(name) = std::env::var("STRATUS_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(env) = std::env::var("STRATUS_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Ok(bucket) = std::env::var("STRATUS_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("STRATUS_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Ok(parallelism) = std::env::var("STRATUS_APPLY_PARALLELISM")
            && let Ok(n) = parallelism.parse::<usize>()
        {
            debug!("Overriding apply.parallelism from environment");
            config.apply.parallelism = n;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratusError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stratus.yaml",
    "stratus.yml",
    "stratus.deploy.yaml",
    "stratus.deploy.yml",
];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratusError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
state:
  backend: local
resources: []
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.apply.parallelism, 4);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
project:
  name: aks-stack
  environment: prod

state:
  backend: s3
  bucket: stratus-state
  prefix: aks-stack/prod

apply:
  parallelism: 8
  max_retries: 5

resources:
  - type: resource-group
    name: rg
    attributes:
      location: westeurope
  - type: virtual-network
    name: vnet
    attributes:
      resource_group: "${rg.name}"
      address_space: "10.0.0.0/16"
  - type: managed-cluster
    name: aks
    depends_on: [vnet]
    replace: create-then-delete
    attributes:
      resource_group: "${rg.name}"
      node_count: 2

exports:
  cluster_name: "${aks.name}"
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(config.resources.len(), 3);
        assert_eq!(config.apply.parallelism, 8);

        let aks = config.resource("aks").unwrap();
        assert_eq!(aks.resource_type, "managed-cluster");
        assert_eq!(aks.depends_on, vec!["vnet"]);
        assert!(aks.attributes["resource_group"].is_deferred());
        assert!(!aks.attributes["node_count"].is_deferred());
        assert!(config.exports.contains_key("cluster_name"));
    }

    #[test]
    fn parse_rejects_garbage() {
        let parser = ConfigParser::new();
        assert!(parser.parse_yaml("not: [valid", None).is_err());
    }
}
