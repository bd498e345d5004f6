//! Per-type update policies and the provider registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{ProviderError, Result, StratusError};

use super::Provider;

/// How the differ treats attribute changes for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// Attributes that cannot change in place. A change to any of these
    /// turns an update into a replacement.
    pub immutable_attrs: BTreeSet<String>,
    /// Attributes excluded from diffing entirely. Changes here never
    /// trigger an operation.
    pub ignored_attrs: BTreeSet<String>,
}

impl ResourcePolicy {
    /// A policy where every attribute may change in place.
    #[must_use]
    pub fn mutable() -> Self {
        Self::default()
    }

    /// Builds a policy with the given immutable attribute names.
    #[must_use]
    pub fn with_immutable<I, S>(attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            immutable_attrs: attrs.into_iter().map(Into::into).collect(),
            ignored_attrs: BTreeSet::new(),
        }
    }

    /// Adds ignored attribute names to the policy.
    #[must_use]
    pub fn ignoring<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_attrs.extend(attrs.into_iter().map(Into::into));
        self
    }

    /// Returns true if a change to `attr` forces a replacement.
    #[must_use]
    pub fn is_immutable(&self, attr: &str) -> bool {
        self.immutable_attrs.contains(attr)
    }

    /// Returns true if `attr` is excluded from diffing.
    #[must_use]
    pub fn is_ignored(&self, attr: &str) -> bool {
        self.ignored_attrs.contains(attr)
    }
}

struct RegistryEntry {
    provider: Arc<dyn Provider>,
    policy: ResourcePolicy,
}

/// Maps resource types to their provider and update policy.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, RegistryEntry>,
    /// Provider used for types with no explicit registration.
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider and policy for a resource type.
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        provider: Arc<dyn Provider>,
        policy: ResourcePolicy,
    ) {
        self.entries
            .insert(resource_type.into(), RegistryEntry { provider, policy });
    }

    /// Registers a policy for a type served by the fallback provider.
    pub fn register_policy(&mut self, resource_type: impl Into<String>, policy: ResourcePolicy) {
        if let Some(fallback) = &self.fallback {
            self.register(resource_type, Arc::clone(fallback), policy);
        }
    }

    /// Sets the provider used for resource types with no registration.
    pub fn set_fallback(&mut self, provider: Arc<dyn Provider>) {
        self.fallback = Some(provider);
    }

    /// Looks up the provider for a resource type.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownType`] when the type has no
    /// registration and no fallback is set.
    pub fn provider(&self, resource_type: &str) -> Result<Arc<dyn Provider>> {
        if let Some(entry) = self.entries.get(resource_type) {
            return Ok(Arc::clone(&entry.provider));
        }
        self.fallback.as_ref().map(Arc::clone).ok_or_else(|| {
            StratusError::Provider(ProviderError::UnknownType {
                resource_type: resource_type.to_string(),
            })
        })
    }

    /// Looks up the update policy for a resource type.
    ///
    /// Types without an explicit registration get the fully mutable policy.
    #[must_use]
    pub fn policy(&self, resource_type: &str) -> ResourcePolicy {
        self.entries
            .get(resource_type)
            .map_or_else(ResourcePolicy::mutable, |e| e.policy.clone())
    }

    /// Returns true if the registry can serve the given type.
    #[must_use]
    pub fn supports(&self, resource_type: &str) -> bool {
        self.entries.contains_key(resource_type) || self.fallback.is_some()
    }

    /// Returns the explicitly registered resource types.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimProvider;

    #[test]
    fn unknown_type_without_fallback_is_an_error() {
        let registry = ProviderRegistry::new();
        let result = registry.provider("managed-cluster");
        assert!(matches!(
            result,
            Err(StratusError::Provider(ProviderError::UnknownType { .. }))
        ));
    }

    #[test]
    fn fallback_serves_unregistered_types() {
        let mut registry = ProviderRegistry::new();
        registry.set_fallback(Arc::new(SimProvider::new()));

        assert!(registry.provider("anything").is_ok());
        assert!(registry.supports("anything"));
        // Unregistered types still get a policy, just a permissive one.
        assert!(registry.policy("anything").immutable_attrs.is_empty());
    }

    #[test]
    fn policy_lookups_respect_registration() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "resource-group",
            Arc::new(SimProvider::new()),
            ResourcePolicy::with_immutable(["name", "location"]),
        );

        let policy = registry.policy("resource-group");
        assert!(policy.is_immutable("location"));
        assert!(!policy.is_immutable("tags"));
    }
}
