//! Turning diffs into an executable plan.
//!
//! A plan has two parts: deletes for records that are no longer declared,
//! ordered so dependents go before their dependencies, and operations for
//! declared resources in graph order. Replacements stay a single planned
//! operation; the executor expands them according to the strategy.

use std::collections::{BTreeSet, HashMap};

use crate::config::{ReplaceStrategy, StratusConfig};
use crate::graph::{DependencyResolver, ResourceGraph};
use crate::provider::ProviderRegistry;
use crate::state::Snapshot;

use super::diff::{ChangeKind, StateDiffer};

/// A planned operation on a declared resource.
#[derive(Debug, Clone)]
pub struct PlannedOp {
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// The change to apply.
    pub kind: ChangeKind,
    /// Replacement strategy, relevant when `kind` is Replace.
    pub replace: ReplaceStrategy,
    /// Attribute names that changed.
    pub changed_attrs: Vec<String>,
    /// Names this operation must wait for.
    pub dependencies: Vec<String>,
}

/// A planned delete of a recorded resource with no declaration.
#[derive(Debug, Clone)]
pub struct PlannedDelete {
    /// Logical name.
    pub name: String,
    /// Recorded resource type.
    pub resource_type: String,
    /// Recorded provider identity.
    pub provider_id: String,
}

/// Summary counts for a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Recorded resources to delete.
    pub delete: usize,
    /// Declared resources with no changes.
    pub unchanged: usize,
}

/// An executable reconciliation plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Deletes, ordered dependents-first.
    pub deletes: Vec<PlannedDelete>,
    /// Operations on declared resources, in graph order.
    pub ops: Vec<PlannedOp>,
    /// Hash of the configuration the plan was computed from.
    pub config_hash: String,
}

impl Plan {
    /// Summary counts across the plan.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            delete: self.deletes.len(),
            ..PlanSummary::default()
        };
        for op in &self.ops {
            match op.kind {
                ChangeKind::Create => summary.create += 1,
                ChangeKind::Update => summary.update += 1,
                ChangeKind::Replace => summary.replace += 1,
                ChangeKind::NoOp => summary.unchanged += 1,
                // Deletes never appear in ops.
                ChangeKind::Delete => {}
            }
        }
        summary
    }

    /// Returns true if applying the plan would touch the provider.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.deletes.is_empty() || self.ops.iter().any(|op| op.kind != ChangeKind::NoOp)
    }

    /// Finds the planned operation for a declared resource.
    #[must_use]
    pub fn op(&self, name: &str) -> Option<&PlannedOp> {
        self.ops.iter().find(|op| op.name == name)
    }
}

/// Builds plans from configuration, graph, and snapshot.
pub struct Planner<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> Planner<'a> {
    /// Creates a planner using the registry's update policies.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Computes the plan that converges the snapshot to the configuration.
    #[must_use]
    pub fn plan(
        &self,
        config: &StratusConfig,
        graph: &ResourceGraph,
        resolver: &DependencyResolver,
        snapshot: &Snapshot,
        config_hash: &str,
    ) -> Plan {
        let diffs = StateDiffer::new(self.registry).diff(graph, snapshot);

        let mut ops = Vec::new();
        let mut deleted: BTreeSet<String> = BTreeSet::new();

        for diff in diffs {
            if diff.kind == ChangeKind::Delete {
                deleted.insert(diff.name);
                continue;
            }
            let replace = config
                .resource(&diff.name)
                .map(|decl| decl.replace)
                .unwrap_or_default();
            ops.push(PlannedOp {
                dependencies: resolver.dependencies_of(&diff.name).to_vec(),
                name: diff.name,
                resource_type: diff.resource_type,
                kind: diff.kind,
                replace,
                changed_attrs: diff.changed_attrs,
            });
        }

        self.propagate_upstream_changes(graph, resolver, &mut ops);

        let deletes = order_deletes(&deleted, snapshot);

        Plan {
            deletes,
            ops,
            config_hash: config_hash.to_string(),
        }
    }

    /// Upgrades unchanged resources whose deferred attributes consume
    /// outputs of a changing dependency.
    ///
    /// An update or replace upstream re-resolves that resource's outputs,
    /// so a textually identical `${dep.output}` downstream still yields a
    /// new value and must be re-applied. Walking in topological order lets
    /// upgrades cascade down the whole chain.
    fn propagate_upstream_changes(
        &self,
        graph: &ResourceGraph,
        resolver: &DependencyResolver,
        ops: &mut [PlannedOp],
    ) {
        // Owned keys: the loop below mutates the ops it indexes.
        let index: HashMap<String, usize> = ops
            .iter()
            .enumerate()
            .map(|(position, op)| (op.name.clone(), position))
            .collect();

        for name in resolver.order() {
            let Some(&at) = index.get(name) else {
                continue;
            };
            if ops[at].kind != ChangeKind::NoOp {
                continue;
            }
            let Some(node) = graph.node(name) else {
                continue;
            };

            // Expressions were parsed when the graph was built; an attribute
            // without references never goes stale.
            let mut stale: Vec<String> = node
                .attributes
                .iter()
                .filter(|(_, expr)| {
                    expr.references().unwrap_or_default().iter().any(|r| {
                        index
                            .get(r.node.as_str())
                            .is_some_and(|&dep| ops[dep].kind != ChangeKind::NoOp)
                    })
                })
                .map(|(attr, _)| attr.clone())
                .collect();

            if stale.is_empty() {
                continue;
            }
            stale.sort();

            let policy = self.registry.policy(&node.id.resource_type);
            ops[at].kind = if stale.iter().any(|attr| policy.is_immutable(attr)) {
                ChangeKind::Replace
            } else {
                ChangeKind::Update
            };
            ops[at].changed_attrs = stale;
        }
    }

    /// Computes the plan that deletes everything in the snapshot.
    #[must_use]
    pub fn plan_destroy(&self, snapshot: &Snapshot) -> Plan {
        let all: BTreeSet<String> = snapshot.resources.keys().cloned().collect();
        Plan {
            deletes: order_deletes(&all, snapshot),
            ops: Vec::new(),
            config_hash: String::new(),
        }
    }
}

/// Orders deletes dependents-first using the dependencies recorded in the
/// snapshot. The declarations are gone, so the records are the only edge
/// source left.
fn order_deletes(deleted: &BTreeSet<String>, snapshot: &Snapshot) -> Vec<PlannedDelete> {
    // Edges restricted to the deleted set; anything else still exists and
    // does not constrain delete order.
    let deps: HashMap<&str, Vec<&str>> = deleted
        .iter()
        .map(|name| {
            let record_deps = snapshot.get_resource(name).map_or_else(Vec::new, |r| {
                r.dependencies
                    .iter()
                    .map(String::as_str)
                    .filter(|d| deleted.contains(*d))
                    .collect()
            });
            (name.as_str(), record_deps)
        })
        .collect();

    let mut dependents_count: HashMap<&str, usize> = deleted
        .iter()
        .map(|name| (name.as_str(), 0))
        .collect();
    for targets in deps.values() {
        for target in targets {
            if let Some(count) = dependents_count.get_mut(target) {
                *count += 1;
            }
        }
    }

    // Kahn over reversed edges: a resource is deletable once everything
    // that depended on it is gone.
    let mut ready: BTreeSet<&str> = dependents_count
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut ordered = Vec::with_capacity(deleted.len());
    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        ordered.push(name);
        if let Some(targets) = deps.get(name) {
            for target in targets {
                if let Some(count) = dependents_count.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(target);
                    }
                }
            }
        }
    }

    // Records can only cycle if the snapshot is corrupt; append leftovers
    // rather than losing them.
    for name in deleted {
        if !ordered.contains(&name.as_str()) {
            ordered.push(name);
        }
    }

    ordered
        .into_iter()
        .map(|name| {
            let (resource_type, provider_id) = snapshot
                .get_resource(name)
                .map_or_else(Default::default, |r| {
                    (r.resource_type.clone(), r.provider_id.clone())
                });
            PlannedDelete {
                name: name.to_string(),
                resource_type,
                provider_id,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecHasher;
    use crate::graph::GraphBuilder;
    use crate::provider::simulated_registry;
    use crate::state::ResourceRecord;

    fn config(yaml: &str) -> StratusConfig {
        serde_yaml::from_str(yaml).expect("test config should parse")
    }

    fn plan_for(cfg: &StratusConfig, snapshot: &Snapshot) -> Plan {
        let registry = simulated_registry();
        let graph = GraphBuilder.build(cfg).unwrap();
        let resolver = DependencyResolver::new(&graph);
        let hash = SpecHasher.hash_config(cfg);
        Planner::new(&registry).plan(cfg, &graph, &resolver, snapshot, &hash)
    }

    const CHAIN: &str = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
    attributes:
      location: westeurope
  - type: virtual-network
    name: vnet
    attributes:
      group: ${rg.name}
";

    #[test]
    fn fresh_config_plans_creates_with_dependencies() {
        let cfg = config(CHAIN);
        let plan = plan_for(&cfg, &Snapshot::new("demo", "dev"));

        assert!(plan.has_changes());
        let summary = plan.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.delete, 0);

        let vnet = plan.op("vnet").unwrap();
        assert_eq!(vnet.dependencies, vec!["rg"]);
    }

    #[test]
    fn identical_snapshot_plans_nothing() {
        let cfg = config(CHAIN);
        let mut snapshot = Snapshot::new("demo", "dev");
        for decl in &cfg.resources {
            let mut record = ResourceRecord::new(&decl.name, &decl.resource_type, "pid", "h");
            for (attr, expr) in &decl.attributes {
                record.attr_exprs.insert(attr.clone(), expr.canonical());
            }
            snapshot.set_resource(record);
        }

        let plan = plan_for(&cfg, &snapshot);
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().unchanged, 2);
    }

    #[test]
    fn upstream_change_upgrades_dependents_with_deferred_attributes() {
        let cfg = config(CHAIN);

        // rg was applied with a different location; vnet's expression is
        // textually identical but consumes rg outputs.
        let mut snapshot = Snapshot::new("demo", "dev");
        let mut rg = ResourceRecord::new("rg", "resource-group", "pid-rg", "h");
        rg.attr_exprs.insert(
            "location".to_string(),
            crate::config::AttrExpr::string("northeurope").canonical(),
        );
        let mut vnet = ResourceRecord::new("vnet", "virtual-network", "pid-vnet", "h");
        vnet.attr_exprs.insert(
            "group".to_string(),
            crate::config::AttrExpr::string("${rg.name}").canonical(),
        );
        snapshot.set_resource(rg);
        snapshot.set_resource(vnet);

        let plan = plan_for(&cfg, &snapshot);

        // location is immutable for resource groups in the simulated registry.
        assert_eq!(plan.op("rg").unwrap().kind, ChangeKind::Replace);
        let vnet_op = plan.op("vnet").unwrap();
        assert_eq!(vnet_op.kind, ChangeKind::Update);
        assert_eq!(vnet_op.changed_attrs, vec!["group"]);
    }

    #[test]
    fn deletes_are_ordered_dependents_first() {
        let cfg = config(
            r"
project:
  name: demo
state:
  backend: local
resources: []
",
        );

        let mut snapshot = Snapshot::new("demo", "dev");
        let mut rg = ResourceRecord::new("rg", "resource-group", "pid-rg", "h");
        let mut vnet = ResourceRecord::new("vnet", "virtual-network", "pid-vnet", "h");
        vnet.dependencies.push("rg".to_string());
        let mut aks = ResourceRecord::new("aks", "managed-cluster", "pid-aks", "h");
        aks.dependencies.push("vnet".to_string());
        rg.dependencies.clear();
        snapshot.set_resource(rg);
        snapshot.set_resource(vnet);
        snapshot.set_resource(aks);

        let plan = plan_for(&cfg, &snapshot);
        let names: Vec<&str> = plan.deletes.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["aks", "vnet", "rg"]);
        assert_eq!(plan.deletes[0].provider_id, "pid-aks");
    }
}
