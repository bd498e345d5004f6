//! Simulated provider.
//!
//! Creates nothing real: provider identities are derived from the resource
//! id, and outputs echo the resolved attributes plus `name` and `id`. The
//! CLI uses it to run plans end to end without credentials, and tests
//! script failures against it to exercise the retry and skip paths.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{ProviderError, Result, StratusError};
use crate::graph::{OutputMap, ResolvedAttrs, ResourceId};

use super::{Applied, Provider, ProviderRegistry, ResourcePolicy};

/// One observed provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Operation name: "create", "update", or "delete".
    pub op: &'static str,
    /// Logical name of the resource.
    pub resource: String,
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// Number of upcoming calls that fail transiently.
    transient_remaining: u32,
    /// Whether every call fails fatally.
    fatal: bool,
}

/// In-memory provider with scriptable failures.
#[derive(Debug, Default)]
pub struct SimProvider {
    failures: Mutex<HashMap<String, FailurePlan>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl SimProvider {
    /// Creates a provider that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls touching `resource` fail transiently.
    pub fn fail_transient(&self, resource: &str, count: u32) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failures.entry(resource.to_string()).or_default().transient_remaining = count;
    }

    /// Makes every call touching `resource` fail fatally.
    pub fn fail_fatal(&self, resource: &str) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failures.entry(resource.to_string()).or_default().fatal = true;
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls that touched `resource`.
    #[must_use]
    pub fn call_count(&self, resource: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.resource == resource)
            .count()
    }

    /// Records the call and applies any scripted failure.
    fn check(&self, op: &'static str, id: &ResourceId) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CallRecord {
                op,
                resource: id.name.clone(),
            });

        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(plan) = failures.get_mut(&id.name) {
            if plan.fatal {
                return Err(StratusError::Provider(ProviderError::fatal(format!(
                    "simulated fatal failure for {id}"
                ))));
            }
            if plan.transient_remaining > 0 {
                plan.transient_remaining -= 1;
                return Err(StratusError::Provider(ProviderError::transient(format!(
                    "simulated transient failure for {id}"
                ))));
            }
        }
        Ok(())
    }

    fn outputs_for(id: &ResourceId, provider_id: &str, attrs: &ResolvedAttrs) -> OutputMap {
        let mut outputs: OutputMap = attrs.clone();
        outputs.insert(
            "name".to_string(),
            serde_json::Value::String(id.name.clone()),
        );
        outputs.insert(
            "id".to_string(),
            serde_json::Value::String(provider_id.to_string()),
        );
        outputs
    }
}

/// Derives a stable provider identity from the resource id.
fn derive_provider_id(id: &ResourceId) -> String {
    let digest = Sha256::digest(id.to_string().as_bytes());
    format!("{}-{}", id.name, &hex::encode(digest)[..8])
}

#[async_trait]
impl Provider for SimProvider {
    async fn create(&self, id: &ResourceId, attrs: &ResolvedAttrs) -> Result<Applied> {
        self.check("create", id)?;
        let provider_id = derive_provider_id(id);
        let outputs = Self::outputs_for(id, &provider_id, attrs);
        Ok(Applied {
            provider_id,
            outputs,
        })
    }

    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        attrs: &ResolvedAttrs,
    ) -> Result<Applied> {
        self.check("update", id)?;
        Ok(Applied {
            provider_id: provider_id.to_string(),
            outputs: Self::outputs_for(id, provider_id, attrs),
        })
    }

    async fn delete(&self, id: &ResourceId, _provider_id: &str) -> Result<()> {
        self.check("delete", id)
    }
}

/// Builds a registry backed by the simulated provider, with update
/// policies for the built-in demo types.
#[must_use]
pub fn simulated_registry() -> ProviderRegistry {
    let provider = std::sync::Arc::new(SimProvider::new());
    let mut registry = ProviderRegistry::new();
    registry.set_fallback(provider);

    registry.register_policy(
        "resource-group",
        ResourcePolicy::with_immutable(["name", "location"]),
    );
    registry.register_policy(
        "virtual-network",
        ResourcePolicy::with_immutable(["name"]).ignoring(["subnets"]),
    );
    registry.register_policy("subnet", ResourcePolicy::with_immutable(["name"]));
    registry.register_policy(
        "managed-cluster",
        ResourcePolicy::with_immutable(["name", "dns_prefix"]),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> ResolvedAttrs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_is_deterministic_and_echoes_attributes() {
        let provider = SimProvider::new();
        let id = ResourceId::new("resource-group", "rg");
        let attrs = attrs(&[("location", serde_json::json!("westeurope"))]);

        let first = provider.create(&id, &attrs).await.unwrap();
        let second = provider.create(&id, &attrs).await.unwrap();

        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(first.outputs["location"], serde_json::json!("westeurope"));
        assert_eq!(first.outputs["name"], serde_json::json!("rg"));
        assert_eq!(provider.call_count("rg"), 2);
    }

    #[tokio::test]
    async fn scripted_transient_failures_run_out() {
        let provider = SimProvider::new();
        provider.fail_transient("vnet", 2);
        let id = ResourceId::new("virtual-network", "vnet");
        let attrs = ResolvedAttrs::new();

        assert!(provider.create(&id, &attrs).await.unwrap_err().is_retryable());
        assert!(provider.create(&id, &attrs).await.unwrap_err().is_retryable());
        assert!(provider.create(&id, &attrs).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_fatal_failures_persist() {
        let provider = SimProvider::new();
        provider.fail_fatal("aks");
        let id = ResourceId::new("managed-cluster", "aks");

        let err = provider.create(&id, &ResolvedAttrs::new()).await.unwrap_err();
        assert!(!err.is_retryable());
        let err = provider.delete(&id, "aks-1").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
