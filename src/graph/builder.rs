//! Resource graph construction.
//!
//! Turns a declaration set into a DAG of [`ResourceNode`]s. Edges come
//! from two places: implicit references inside attribute expressions
//! (`${node.output}`) and explicit `depends_on` hints. Construction
//! fails before any provider call if a name is duplicated, a reference
//! targets an undeclared resource, or the edge set contains a cycle.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::StratusConfig;
use crate::error::{GraphError, Result, StratusError};

use super::node::ResourceNode;

/// A validated, acyclic resource graph.
#[derive(Debug)]
pub struct ResourceGraph {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Logical name -> index into `nodes`.
    index: HashMap<String, usize>,
}

/// Builder for [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the resource graph from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource`, `UnresolvedReference`, `SelfReference`
    /// or `Cycle` on an invalid declaration set.
    pub fn build(&self, config: &StratusConfig) -> Result<ResourceGraph> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, decl) in config.resources.iter().enumerate() {
            if index.insert(decl.name.clone(), i).is_some() {
                return Err(StratusError::Graph(GraphError::DuplicateResource {
                    name: decl.name.clone(),
                }));
            }
        }

        let mut nodes = Vec::with_capacity(config.resources.len());
        for (i, decl) in config.resources.iter().enumerate() {
            // Implicit edges from attribute references.
            let mut deps: BTreeSet<String> = BTreeSet::new();
            for expr in decl.attributes.values() {
                for output_ref in expr.references()? {
                    deps.insert(output_ref.node);
                }
            }
            // Explicit ordering hints.
            for dep in &decl.depends_on {
                deps.insert(dep.clone());
            }

            for dep in &deps {
                if dep == &decl.name {
                    return Err(StratusError::Graph(GraphError::SelfReference {
                        name: decl.name.clone(),
                    }));
                }
                if !index.contains_key(dep) {
                    return Err(StratusError::Graph(GraphError::UnresolvedReference {
                        referrer: decl.name.clone(),
                        target: dep.clone(),
                    }));
                }
            }

            nodes.push(ResourceNode::from_decl(decl, i, deps.into_iter().collect()));
        }

        let graph = ResourceGraph { nodes, index };
        graph.check_acyclic()?;

        debug!(
            "Built resource graph: {} nodes, {} edges",
            graph.nodes.len(),
            graph.nodes.iter().map(|n| n.dependencies.len()).sum::<usize>()
        );
        Ok(graph)
    }
}

impl ResourceGraph {
    /// All nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by logical name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Names of nodes that depend on `name` directly.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.iter().any(|d| d == name))
            .map(|n| n.id.name.as_str())
            .collect()
    }

    /// Verifies the edge set is acyclic.
    ///
    /// Kahn's algorithm; if any node remains unprocessed a cycle exists
    /// and its path is reconstructed for the error message.
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.name.as_str(), n.dependencies.len()))
            .collect();

        let mut queue: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.name.as_str())
            .collect();

        let mut processed = 0usize;
        while let Some(name) = queue.pop() {
            processed += 1;
            for dependent in self.dependents_of(name) {
                let degree = in_degree
                    .get_mut(dependent)
                    .unwrap_or_else(|| unreachable!("dependent is a declared node"));
                *degree -= 1;
                if *degree == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed == self.nodes.len() {
            return Ok(());
        }

        Err(StratusError::Graph(GraphError::Cycle {
            cycle: self.describe_cycle(&in_degree),
        }))
    }

    /// Walks dependency edges among unprocessed nodes to print one cycle.
    fn describe_cycle(&self, in_degree: &HashMap<&str, usize>) -> String {
        let remaining: HashSet<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d > 0)
            .map(|(&n, _)| n)
            .collect();

        let Some(&start) = remaining.iter().min() else {
            return String::from("unknown");
        };

        let mut path = vec![start];
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut current = start;

        loop {
            let node = self
                .node(current)
                .unwrap_or_else(|| unreachable!("cycle nodes are declared"));
            let Some(next) = node
                .dependencies
                .iter()
                .map(String::as_str)
                .find(|d| remaining.contains(d))
            else {
                break;
            };
            if !seen.insert(next) {
                path.push(next);
                // Trim the lead-in so only the cycle itself is printed.
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    path.drain(..pos);
                }
                break;
            }
            path.push(next);
            current = next;
        }

        path.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn build(yaml: &str) -> Result<ResourceGraph> {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        GraphBuilder::new().build(&config)
    }

    #[test]
    fn builds_edges_from_references_and_hints() {
        let graph = build(
            r#"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
  - type: virtual-network
    name: vnet
    attributes:
      resource_group: "${rg.name}"
  - type: managed-cluster
    name: aks
    depends_on: [vnet]
    attributes:
      resource_group: "${rg.name}"
"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node("vnet").unwrap().dependencies, vec!["rg"]);
        let aks = graph.node("aks").unwrap();
        assert_eq!(aks.dependencies, vec!["rg", "vnet"]);
        assert_eq!(graph.dependents_of("rg"), vec!["vnet", "aks"]);
    }

    #[test]
    fn undeclared_reference_fails() {
        let err = build(
            r#"
project:
  name: demo
state:
  backend: local
resources:
  - type: virtual-network
    name: vnet
    attributes:
      resource_group: "${missing.name}"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StratusError::Graph(GraphError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn cycle_fails_with_path() {
        let err = build(
            r"
project:
  name: demo
state:
  backend: local
resources:
  - type: a
    name: one
    depends_on: [two]
  - type: b
    name: two
    depends_on: [three]
  - type: c
    name: three
    depends_on: [one]
",
        )
        .unwrap_err();
        let StratusError::Graph(GraphError::Cycle { cycle }) = err else {
            panic!("expected cycle error, got {err}");
        };
        assert!(cycle.contains("->"), "cycle path missing: {cycle}");
    }

    #[test]
    fn self_reference_fails() {
        let err = build(
            r"
project:
  name: demo
state:
  backend: local
resources:
  - type: a
    name: loopy
    depends_on: [loopy]
",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StratusError::Graph(GraphError::SelfReference { .. })
        ));
    }

    #[test]
    fn duplicate_name_fails() {
        let err = build(
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
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StratusError::Graph(GraphError::DuplicateResource { .. })
        ));
    }
}
