//! Structural validation of resource declarations.
//!
//! This catches configuration mistakes that do not need the graph:
//! name syntax, duplicates, empty types, bad expression placeholders,
//! and out-of-range apply settings. Reference and cycle checking lives
//! in the graph builder, which needs the full edge set.

use crate::error::{ConfigError, Result, StratusError};
use std::collections::HashSet;
use tracing::debug;

use super::spec::StratusConfig;

/// Validator for resource declarations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (fatal).
    pub errors: Vec<ValidationIssue>,
    /// Warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation issue.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing the first failure if the
    /// configuration is invalid.
    pub fn validate(&self, config: &StratusConfig) -> Result<ValidationResult> {
        debug!("Validating configuration for {}", config.qualified_name());
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_apply(config, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_exports(config, &mut result);

        if let Some(first) = result.errors.first() {
            return Err(StratusError::Config(ConfigError::validation(
                first.message.clone(),
                first.field.clone(),
            )));
        }

        Ok(result)
    }

    fn validate_project(config: &StratusConfig, result: &mut ValidationResult) {
        if config.project.name.is_empty() {
            result.error("project.name", "Project name must not be empty");
        } else if !is_valid_name(&config.project.name) {
            result.error(
                "project.name",
                "Project name may only contain lowercase letters, digits, '-' and '_'",
            );
        }
    }

    fn validate_state(config: &StratusConfig, result: &mut ValidationResult) {
        if config.state.backend == super::spec::StateBackend::S3 && config.state.bucket.is_none() {
            result.error("state.bucket", "S3 backend requires a bucket name");
        }
    }

    fn validate_apply(config: &StratusConfig, result: &mut ValidationResult) {
        if config.apply.parallelism == 0 {
            result.error("apply.parallelism", "Parallelism must be at least 1");
        }
        if config.apply.max_retries == 0 {
            result.error("apply.max_retries", "At least one attempt is required");
        }
        if config.apply.retry_base_delay_ms > config.apply.retry_max_delay_ms {
            result.error(
                "apply.retry_base_delay_ms",
                "Base retry delay exceeds the maximum retry delay",
            );
        }
    }

    fn validate_resources(config: &StratusConfig, result: &mut ValidationResult) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (idx, resource) in config.resources.iter().enumerate() {
            let field = format!("resources[{idx}]");

            if resource.name.is_empty() {
                result.error(format!("{field}.name"), "Resource name must not be empty");
                continue;
            }
            if !is_valid_name(&resource.name) {
                result.error(
                    format!("{field}.name"),
                    format!(
                        "Resource name '{}' may only contain lowercase letters, digits, '-' and '_'",
                        resource.name
                    ),
                );
            }
            if !seen.insert(resource.name.as_str()) {
                result.error(
                    format!("{field}.name"),
                    format!("Duplicate resource name: {}", resource.name),
                );
            }
            if resource.resource_type.is_empty() {
                result.error(format!("{field}.type"), "Resource type must not be empty");
            }

            for (attr, expr) in &resource.attributes {
                if let Err(e) = expr.references() {
                    result.error(format!("{field}.attributes.{attr}"), e.to_string());
                }
            }

            let mut dep_seen: HashSet<&str> = HashSet::new();
            for dep in &resource.depends_on {
                if !dep_seen.insert(dep.as_str()) {
                    result.warnings.push(format!(
                        "Resource '{}' lists dependency '{dep}' more than once",
                        resource.name
                    ));
                }
            }
        }
    }

    fn validate_exports(config: &StratusConfig, result: &mut ValidationResult) {
        for (name, expr) in &config.exports {
            if let Err(e) = expr.references() {
                result.error(format!("exports.{name}"), e.to_string());
            }
        }
    }
}

/// Checks a logical name against the allowed character set.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> StratusConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn valid_config_passes() {
        let config = parse(
            r#"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
    attributes:
      location: westeurope
"#,
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = parse(
            r"
project:
  name: demo
state:
  backend: local
resources:
  - type: a
    name: dup
  - type: b
    name: dup
",
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn uppercase_names_are_rejected() {
        let config = parse(
            r"
project:
  name: demo
state:
  backend: local
resources:
  - type: a
    name: BadName
",
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let config = parse(
            r"
project:
  name: demo
state:
  backend: s3
resources: []
",
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let config = parse(
            r#"
project:
  name: demo
state:
  backend: local
resources:
  - type: a
    name: node
    attributes:
      target: "${broken"
"#,
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = parse(
            r"
project:
  name: demo
state:
  backend: local
apply:
  parallelism: 0
resources: []
",
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }
}
