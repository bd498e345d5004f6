//! Resource providers: the drivers that turn planned operations into real
//! objects.
//!
//! A provider handles one or more resource types. The executor hands it
//! fully resolved attribute maps; the provider returns the provider-side
//! identity and the outputs other resources may reference.

mod policy;
mod sim;

pub use policy::{ProviderRegistry, ResourcePolicy};
pub use sim::{simulated_registry, SimProvider};

use async_trait::async_trait;

use crate::error::Result;
use crate::graph::{OutputMap, ResolvedAttrs, ResourceId};

/// Result of a successful create or update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Identity assigned by the provider.
    pub provider_id: String,
    /// Output values exposed to dependent resources.
    pub outputs: OutputMap,
}

/// Driver interface for a family of resource types.
///
/// Implementations signal recoverable faults with
/// [`ProviderError::Transient`](crate::error::ProviderError::Transient)
/// and unrecoverable ones with
/// [`ProviderError::Fatal`](crate::error::ProviderError::Fatal); the
/// executor retries the former with backoff and abandons the subtree on
/// the latter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a new resource from resolved attributes.
    async fn create(&self, id: &ResourceId, attrs: &ResolvedAttrs) -> Result<Applied>;

    /// Updates an existing resource in place.
    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        attrs: &ResolvedAttrs,
    ) -> Result<Applied>;

    /// Deletes an existing resource.
    async fn delete(&self, id: &ResourceId, provider_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn registry_dispatches_to_registered_provider() {
        let mut mock = MockProvider::new();
        mock.expect_create()
            .withf(|id, _| id.resource_type == "dns-zone")
            .returning(|id, _| {
                Ok(Applied {
                    provider_id: format!("mock-{}", id.name),
                    outputs: OutputMap::new(),
                })
            });

        let mut registry = ProviderRegistry::new();
        registry.register("dns-zone", Arc::new(mock), ResourcePolicy::mutable());

        let provider = registry.provider("dns-zone").unwrap();
        let id = ResourceId::new("dns-zone", "zone");
        let applied = provider.create(&id, &ResolvedAttrs::new()).await.unwrap();
        assert_eq!(applied.provider_id, "mock-zone");
    }
}
