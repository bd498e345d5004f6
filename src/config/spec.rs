//! Declaration types for the reconciler.
//!
//! This module defines the structs that map to the `stratus.yaml` file.
//! A configuration fully describes the desired state: a set of typed
//! resource declarations whose attributes are either literal values or
//! deferred expressions over other resources' outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, Result, StratusError};

/// The root configuration structure for a Stratus deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StratusConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Snapshot backend configuration.
    pub state: StateConfig,
    /// Apply execution settings.
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Declared resources.
    pub resources: Vec<ResourceDecl>,
    /// Named values exported after a successful apply.
    #[serde(default)]
    pub exports: BTreeMap<String, AttrExpr>,
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

/// Snapshot backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    pub backend: StateBackend,
    /// Local snapshot directory (for the local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses the AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// Snapshot backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based snapshot storage.
    #[default]
    Local,
    /// AWS S3-based snapshot storage.
    S3,
}

/// Apply execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Maximum number of resource operations in flight at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Maximum attempts per operation (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Whether unrelated subtrees keep applying after a fatal failure.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Resource type identifier (selects the provider).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Logical name, unique within the configuration.
    pub name: String,
    /// Attribute map; values may contain `${node.output}` references.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrExpr>,
    /// Explicit ordering dependencies (logical names).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Replace strategy when an immutable attribute changes.
    #[serde(default)]
    pub replace: ReplaceStrategy,
}

/// Strategy for replacing a resource whose immutable attributes changed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// Delete the old object, then create the replacement.
    #[default]
    DeleteThenCreate,
    /// Create the replacement first, then delete the old object.
    CreateThenDelete,
}

/// An attribute expression: a literal JSON value, possibly containing
/// `${node.output}` references in its strings at any nesting depth.
///
/// A string that is exactly one reference resolves to the referenced
/// output's raw value; a string mixing text and references interpolates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AttrExpr(pub serde_json::Value);

/// A reference to one resource's output value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    /// Logical name of the producing resource.
    pub node: String,
    /// Name of the output on that resource.
    pub output: String,
}

// Default value functions

const fn default_parallelism() -> usize {
    4
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    500
}

const fn default_retry_max_delay_ms() -> u64 {
    30_000
}

const fn default_continue_on_error() -> bool {
    true
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            continue_on_error: default_continue_on_error(),
        }
    }
}

impl AttrExpr {
    /// Wraps a literal JSON value.
    #[must_use]
    pub const fn literal(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Wraps a plain string (which may contain references).
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self(serde_json::Value::String(value.into()))
    }

    /// Collects every output reference in this expression.
    ///
    /// # Errors
    ///
    /// Returns an error if a `${...}` placeholder is malformed.
    pub fn references(&self) -> Result<Vec<OutputRef>> {
        let mut refs = Vec::new();
        collect_refs(&self.0, &mut refs)?;
        Ok(refs)
    }

    /// Returns true if this expression depends on at least one output.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.references().map(|r| !r.is_empty()).unwrap_or(false)
    }

    /// The canonical serialized form, used for hashing and diffing.
    #[must_use]
    pub fn canonical(&self) -> String {
        // serde_json serializes map keys in order; attribute maps are BTreeMaps
        // so this is deterministic.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Borrows the underlying JSON value.
    #[must_use]
    pub const fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Parses `${node.output}` placeholders out of a string.
///
/// Returns the sequence of literal/reference segments.
pub(crate) fn parse_segments(s: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        if !rest[..start].is_empty() {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(StratusError::Config(ConfigError::InvalidExpression {
                expr: s.to_string(),
                message: String::from("unterminated ${ placeholder"),
            }));
        };
        let inner = &after[..end];
        let Some((node, output)) = inner.split_once('.') else {
            return Err(StratusError::Config(ConfigError::InvalidExpression {
                expr: s.to_string(),
                message: format!("reference '{inner}' must have the form node.output"),
            }));
        };
        if node.is_empty() || output.is_empty() {
            return Err(StratusError::Config(ConfigError::InvalidExpression {
                expr: s.to_string(),
                message: format!("reference '{inner}' must have the form node.output"),
            }));
        }
        segments.push(Segment::Ref(OutputRef {
            node: node.to_string(),
            output: output.to_string(),
        }));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    Ok(segments)
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Literal text.
    Text(String),
    /// An output reference.
    Ref(OutputRef),
}

fn collect_refs(value: &serde_json::Value, out: &mut Vec<OutputRef>) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            for segment in parse_segments(s)? {
                if let Segment::Ref(r) = segment {
                    out.push(r);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_refs(item, out)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

impl StratusConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns the declared resource names in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Finds a declaration by logical name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.name == name)
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.output)
    }
}

impl std::fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeleteThenCreate => "delete-then-create",
            Self::CreateThenDelete => "create-then-delete",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_string_has_no_refs() {
        let expr = AttrExpr::string("westeurope");
        assert!(!expr.is_deferred());
        assert!(expr.references().unwrap().is_empty());
    }

    #[test]
    fn parse_whole_string_reference() {
        let expr = AttrExpr::string("${rg.name}");
        let refs = expr.references().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].node, "rg");
        assert_eq!(refs[0].output, "name");
    }

    #[test]
    fn parse_interpolated_references() {
        let expr = AttrExpr::string("https://${lb.host}:${lb.port}/healthz");
        let refs = expr.references().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].output, "port");
    }

    #[test]
    fn refs_are_collected_from_nested_values() {
        let expr = AttrExpr::literal(serde_json::json!({
            "pools": [{"subnet": "${subnet1.id}"}, {"subnet": "${subnet2.id}"}],
        }));
        let refs = expr.references().unwrap();
        assert_eq!(refs.len(), 2);
        assert!(expr.is_deferred());
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let expr = AttrExpr::string("${rg.name");
        assert!(expr.references().is_err());
    }

    #[test]
    fn reference_without_output_is_rejected() {
        let expr = AttrExpr::string("${rg}");
        assert!(expr.references().is_err());
    }
}
