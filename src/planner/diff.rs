//! Diffing declared resources against the last applied snapshot.
//!
//! The differ compares attribute *expressions*, not resolved values: a
//! deferred attribute like `${rg.name}` has no value until apply time, but
//! its canonical text is stable, so two runs with the same declaration
//! diff as unchanged. Propagating upstream output changes through
//! textually unchanged expressions is the planner's job, not the differ's.

use std::collections::BTreeSet;

use crate::graph::{ResourceGraph, ResourceNode};
use crate::provider::ProviderRegistry;
use crate::state::{ResourceRecord, Snapshot};

/// What kind of change a resource needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The resource is declared but not recorded.
    Create,
    /// Mutable attributes changed; the provider can update in place.
    Update,
    /// An immutable attribute (or the type) changed; the object must be
    /// destroyed and recreated.
    Replace,
    /// The resource is recorded but no longer declared.
    Delete,
    /// Declaration and record agree.
    NoOp,
}

/// Diff result for one resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// Resource type (declared type, or recorded type for deletes).
    pub resource_type: String,
    /// The change this resource needs.
    pub kind: ChangeKind,
    /// Attribute names that changed, sorted. Empty for Create/Delete/NoOp.
    pub changed_attrs: Vec<String>,
    /// Changed attributes that are immutable under the type's policy.
    pub immutable_changes: Vec<String>,
}

/// Compares a resource graph against a snapshot.
pub struct StateDiffer<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> StateDiffer<'a> {
    /// Creates a differ using the registry's update policies.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Diffs every declared resource and every leftover record.
    ///
    /// Declared resources come first in graph order; deletes follow in
    /// recorded-name order (the planner reorders them for execution).
    #[must_use]
    pub fn diff(&self, graph: &ResourceGraph, snapshot: &Snapshot) -> Vec<ResourceDiff> {
        let mut diffs = Vec::with_capacity(graph.len());

        for node in graph.nodes() {
            diffs.push(match snapshot.get_resource(&node.id.name) {
                Some(record) => self.diff_resource(node, record),
                None => ResourceDiff {
                    name: node.id.name.clone(),
                    resource_type: node.id.resource_type.clone(),
                    kind: ChangeKind::Create,
                    changed_attrs: Vec::new(),
                    immutable_changes: Vec::new(),
                },
            });
        }

        for (name, record) in &snapshot.resources {
            if graph.node(name).is_none() {
                diffs.push(ResourceDiff {
                    name: name.clone(),
                    resource_type: record.resource_type.clone(),
                    kind: ChangeKind::Delete,
                    changed_attrs: Vec::new(),
                    immutable_changes: Vec::new(),
                });
            }
        }

        diffs
    }

    /// Diffs one declared resource against its record.
    fn diff_resource(&self, node: &ResourceNode, record: &ResourceRecord) -> ResourceDiff {
        let name = node.id.name.clone();
        let policy = self.registry.policy(&node.id.resource_type);

        // A type change can never be applied in place.
        if node.id.resource_type != record.resource_type {
            return ResourceDiff {
                name,
                resource_type: node.id.resource_type.clone(),
                kind: ChangeKind::Replace,
                changed_attrs: vec!["type".to_string()],
                immutable_changes: vec!["type".to_string()],
            };
        }

        let mut attr_names: BTreeSet<&str> = node.attributes.keys().map(String::as_str).collect();
        attr_names.extend(record.attr_exprs.keys().map(String::as_str));

        let mut changed: Vec<String> = Vec::new();
        for attr in attr_names {
            if policy.is_ignored(attr) {
                continue;
            }
            let declared = node.attributes.get(attr).map(|e| e.canonical());
            let recorded = record.attr_exprs.get(attr).cloned();
            if declared != recorded {
                changed.push(attr.to_string());
            }
        }

        let immutable: Vec<String> = changed
            .iter()
            .filter(|a| policy.is_immutable(a))
            .cloned()
            .collect();

        let kind = if changed.is_empty() {
            ChangeKind::NoOp
        } else if immutable.is_empty() {
            ChangeKind::Update
        } else {
            ChangeKind::Replace
        };

        ResourceDiff {
            name,
            resource_type: node.id.resource_type.clone(),
            kind,
            changed_attrs: changed,
            immutable_changes: immutable,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}
