//! Topological ordering over the resource graph.
//!
//! Computes the evaluation order the planner and executor follow. Ties
//! among independent nodes are broken by declaration order, so the same
//! declaration set always produces the same order. Also answers the
//! executor's scheduling question: which nodes become runnable once a
//! given set of nodes has committed.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::builder::ResourceGraph;

/// Deterministic topological order plus adjacency lookups.
#[derive(Debug)]
pub struct DependencyResolver {
    /// Node names in topological order.
    order: Vec<String>,
    /// Name -> direct dependencies.
    deps: HashMap<String, Vec<String>>,
    /// Name -> direct dependents.
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyResolver {
    /// Computes the order for an already-validated (acyclic) graph.
    #[must_use]
    pub fn new(graph: &ResourceGraph) -> Self {
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let decl_index: HashMap<&str, usize> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.name.as_str(), n.decl_index))
            .collect();

        for node in graph.nodes() {
            deps.insert(node.id.name.clone(), node.dependencies.clone());
            dependents.entry(node.id.name.clone()).or_default();
            in_degree.insert(node.id.name.as_str(), node.dependencies.len());
            for dep in &node.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.id.name.clone());
            }
        }

        // Kahn's algorithm; the ready set is keyed by declaration index so
        // independent nodes come out in declaration order.
        let mut ready: BTreeSet<(usize, &str)> = graph
            .nodes()
            .iter()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| (n.decl_index, n.id.name.as_str()))
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(&(idx, name)) = ready.iter().next() {
            ready.remove(&(idx, name));
            order.push(name.to_string());

            if let Some(deps_of) = dependents.get(name) {
                for dependent in deps_of {
                    let degree = in_degree
                        .get_mut(dependent.as_str())
                        .unwrap_or_else(|| unreachable!("dependent is a declared node"));
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((decl_index[dependent.as_str()], dependent.as_str()));
                    }
                }
            }
        }

        debug_assert_eq!(order.len(), graph.len(), "graph must be acyclic");

        Self {
            order,
            deps,
            dependents,
        }
    }

    /// Node names in topological order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Direct dependencies of a node.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.deps.get(name).map_or(&[], Vec::as_slice)
    }

    /// Direct dependents of a node.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map_or(&[], Vec::as_slice)
    }

    /// Nodes whose dependencies are all in `completed` and which are not
    /// themselves in `completed` or `excluded` (started, failed, skipped).
    ///
    /// This is the executor's eligibility set: everything returned here
    /// may start immediately and in parallel.
    #[must_use]
    pub fn runnable<'a>(
        &'a self,
        completed: &HashSet<String>,
        excluded: &HashSet<String>,
    ) -> Vec<&'a str> {
        self.order
            .iter()
            .filter(|name| !completed.contains(*name) && !excluded.contains(*name))
            .filter(|name| {
                self.dependencies_of(name)
                    .iter()
                    .all(|d| completed.contains(d))
            })
            .map(String::as_str)
            .collect()
    }

    /// All transitive dependents of a node, in topological order.
    ///
    /// Used to mark a failed node's whole subtree as skipped.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let mut affected: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if affected.insert(dependent.as_str()) {
                    stack.push(dependent);
                }
            }
        }
        self.order
            .iter()
            .map(String::as_str)
            .filter(|n| affected.contains(n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::graph::GraphBuilder;

    fn resolver(yaml: &str) -> DependencyResolver {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let graph = GraphBuilder::new().build(&config).unwrap();
        DependencyResolver::new(&graph)
    }

    const DIAMOND: &str = r#"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
  - type: subnet
    name: subnet-b
    attributes:
      group: "${rg.name}"
  - type: subnet
    name: subnet-a
    attributes:
      group: "${rg.name}"
  - type: managed-cluster
    name: aks
    depends_on: [subnet-a, subnet-b]
"#;

    #[test]
    fn every_node_appears_after_its_dependencies() {
        let r = resolver(DIAMOND);
        let pos: std::collections::HashMap<&str, usize> = r
            .order()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        for name in r.order() {
            for dep in r.dependencies_of(name) {
                assert!(pos[dep.as_str()] < pos[name.as_str()]);
            }
        }
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let r = resolver(DIAMOND);
        // subnet-b is declared before subnet-a, so it sorts first.
        assert_eq!(r.order(), &["rg", "subnet-b", "subnet-a", "aks"]);
    }

    #[test]
    fn runnable_tracks_completion() {
        let r = resolver(DIAMOND);
        let none = HashSet::new();

        assert_eq!(r.runnable(&none, &none), vec!["rg"]);

        let completed: HashSet<String> = [String::from("rg")].into();
        assert_eq!(r.runnable(&completed, &none), vec!["subnet-b", "subnet-a"]);

        let all_but_aks: HashSet<String> = [
            String::from("rg"),
            String::from("subnet-a"),
            String::from("subnet-b"),
        ]
        .into();
        assert_eq!(r.runnable(&all_but_aks, &none), vec!["aks"]);
    }

    #[test]
    fn excluded_nodes_are_not_runnable() {
        let r = resolver(DIAMOND);
        let completed: HashSet<String> = [String::from("rg")].into();
        let excluded: HashSet<String> = [String::from("subnet-a")].into();
        assert_eq!(r.runnable(&completed, &excluded), vec!["subnet-b"]);
    }

    #[test]
    fn transitive_dependents_cover_the_subtree() {
        let r = resolver(DIAMOND);
        assert_eq!(
            r.transitive_dependents("rg"),
            vec!["subnet-b", "subnet-a", "aks"]
        );
        assert_eq!(r.transitive_dependents("subnet-a"), vec!["aks"]);
        assert!(r.transitive_dependents("aks").is_empty());
    }
}
