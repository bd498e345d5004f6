//! Resource node and identity types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AttrExpr, ReplaceStrategy, ResourceDecl};

/// Resolved attribute values, keyed by attribute name.
pub type ResolvedAttrs = BTreeMap<String, serde_json::Value>;

/// Output values produced by one resource, keyed by output name.
pub type OutputMap = BTreeMap<String, serde_json::Value>;

/// Identity of a resource: type plus logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type identifier (selects the provider).
    pub resource_type: String,
    /// Logical name, unique within a configuration.
    pub name: String,
}

impl ResourceId {
    /// Creates a new resource identity.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// A node in the resource graph.
///
/// Nodes are created at graph-build time from declarations; a node is
/// bound to a live provider object at apply time.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Resource identity.
    pub id: ResourceId,
    /// Position in the declaration set (used for deterministic ordering).
    pub decl_index: usize,
    /// Attribute expressions (literal or deferred).
    pub attributes: BTreeMap<String, AttrExpr>,
    /// Names of resources this node depends on, implicit and explicit,
    /// deduplicated and sorted.
    pub dependencies: Vec<String>,
    /// Strategy used when replacement is required.
    pub replace: ReplaceStrategy,
}

impl ResourceNode {
    /// Builds a node from a declaration and its computed dependency set.
    #[must_use]
    pub fn from_decl(decl: &ResourceDecl, decl_index: usize, dependencies: Vec<String>) -> Self {
        Self {
            id: ResourceId::new(&decl.resource_type, &decl.name),
            decl_index,
            attributes: decl.attributes.clone(),
            dependencies,
            replace: decl.replace,
        }
    }

    /// Returns true if any attribute of this node is deferred.
    #[must_use]
    pub fn has_deferred_attributes(&self) -> bool {
        self.attributes.values().any(AttrExpr::is_deferred)
    }
}
