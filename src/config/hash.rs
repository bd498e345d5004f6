//! Spec hashing for change detection.
//!
//! This module provides deterministic hashing of resource declarations
//! to detect changes between runs and enable idempotent operations.

use sha2::{Digest, Sha256};

use super::spec::{ResourceDecl, StratusConfig};

/// Hasher for computing declaration hashes.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire configuration.
    ///
    /// This hash changes when any declaration changes.
    #[must_use]
    pub fn hash_config(&self, config: &StratusConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, expr) in &config.exports {
            hasher.update(name.as_bytes());
            hasher.update(expr.canonical().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    ///
    /// Attributes hash over their canonical expressions, so a deferred
    /// attribute changes the hash only when its expression text changes,
    /// not when an upstream output resolves to a different value.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceDecl) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.resource_type.as_bytes());
        hasher.update(resource.name.as_bytes());

        // BTreeMap iteration is already sorted by attribute name.
        for (attr, expr) in &resource.attributes {
            hasher.update(attr.as_bytes());
            hasher.update(expr.canonical().as_bytes());
        }

        let mut deps: Vec<&str> = resource.depends_on.iter().map(String::as_str).collect();
        deps.sort_unstable();
        for dep in deps {
            hasher.update(dep.as_bytes());
        }

        hasher.update(resource.replace.to_string().as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{AttrExpr, ReplaceStrategy};
    use std::collections::BTreeMap;

    fn decl(name: &str, location: &str) -> ResourceDecl {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("location"), AttrExpr::string(location));
        ResourceDecl {
            resource_type: String::from("resource-group"),
            name: name.to_string(),
            attributes,
            depends_on: vec![],
            replace: ReplaceStrategy::DeleteThenCreate,
        }
    }

    #[test]
    fn resource_hash_is_deterministic() {
        let hasher = SpecHasher::new();
        let r = decl("rg", "westeurope");
        assert_eq!(hasher.hash_resource(&r), hasher.hash_resource(&r));
    }

    #[test]
    fn attribute_change_changes_hash() {
        let hasher = SpecHasher::new();
        let a = decl("rg", "westeurope");
        let b = decl("rg", "northeurope");
        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn dependency_order_does_not_affect_hash() {
        let hasher = SpecHasher::new();
        let mut a = decl("aks", "westeurope");
        a.depends_on = vec![String::from("vnet"), String::from("rg")];
        let mut b = decl("aks", "westeurope");
        b.depends_on = vec![String::from("rg"), String::from("vnet")];
        assert_eq!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn replace_strategy_affects_hash() {
        let hasher = SpecHasher::new();
        let a = decl("rg", "westeurope");
        let mut b = decl("rg", "westeurope");
        b.replace = ReplaceStrategy::CreateThenDelete;
        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn short_hash_is_eight_chars() {
        let hasher = SpecHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }
}
