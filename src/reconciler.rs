//! End-to-end reconciliation: declarations in, converged resources out.
//!
//! The reconciler wires the pipeline together: validate the
//! configuration, build the dependency graph, diff against the stored
//! snapshot, and hand the plan to the executor. Structural errors
//! (cycles, dangling references) surface here, before any provider is
//! touched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::apply::{ApplyExecutor, ApplyReport, ResourceOutcome};
use crate::config::{ConfigValidator, SpecHasher, StratusConfig};
use crate::error::{Result, StateError, StratusError};
use crate::graph::{DependencyResolver, GraphBuilder, OutputMap, ResourceGraph};
use crate::outputs::evaluate_expr;
use crate::planner::{Plan, Planner};
use crate::provider::ProviderRegistry;
use crate::state::{RunHistoryEntry, RunOperation, Snapshot, SnapshotStore};

/// Drives full reconciliation runs for one configuration.
pub struct Reconciler {
    config: StratusConfig,
    registry: ProviderRegistry,
}

impl Reconciler {
    /// Creates a reconciler for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: StratusConfig, registry: ProviderRegistry) -> Result<Self> {
        ConfigValidator::new().validate(&config)?;
        Ok(Self { config, registry })
    }

    /// The configuration this reconciler was built from.
    #[must_use]
    pub const fn config(&self) -> &StratusConfig {
        &self.config
    }

    /// Builds and validates the resource graph.
    fn build_graph(&self) -> Result<(ResourceGraph, DependencyResolver)> {
        let graph = GraphBuilder.build(&self.config)?;
        let resolver = DependencyResolver::new(&graph);
        Ok((graph, resolver))
    }

    /// Loads the snapshot, or starts a fresh one.
    async fn load_snapshot(&self, store: &dyn SnapshotStore) -> Result<Snapshot> {
        Ok(store.load().await?.unwrap_or_else(|| {
            Snapshot::new(&self.config.project.name, &self.config.project.environment)
        }))
    }

    /// Computes the plan without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or the snapshot cannot
    /// be loaded.
    pub async fn plan(&self, store: &dyn SnapshotStore) -> Result<Plan> {
        let (graph, resolver) = self.build_graph()?;
        let snapshot = self.load_snapshot(store).await?;
        let hash = SpecHasher.hash_config(&self.config);

        Ok(Planner::new(&self.registry).plan(&self.config, &graph, &resolver, &snapshot, &hash))
    }

    /// Plans and applies, committing progress to the snapshot store.
    ///
    /// Per-resource failures land in the report; the returned error is
    /// reserved for structural problems, snapshot commit conflicts, and
    /// internal faults.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or a snapshot operation
    /// fails.
    pub async fn apply(
        &self,
        store: &dyn SnapshotStore,
        cancel: watch::Receiver<bool>,
    ) -> Result<ApplyReport> {
        let (graph, resolver) = self.build_graph()?;
        let mut snapshot = self.load_snapshot(store).await?;
        let hash = SpecHasher.hash_config(&self.config);

        let plan = Planner::new(&self.registry).plan(&self.config, &graph, &resolver, &snapshot, &hash);
        let summary = plan.summary();
        info!(
            create = summary.create,
            update = summary.update,
            replace = summary.replace,
            delete = summary.delete,
            unchanged = summary.unchanged,
            "Applying plan"
        );

        let executor = ApplyExecutor::new(&self.registry, &self.config.apply);
        let report = executor
            .execute(&self.config, &graph, &resolver, &plan, &mut snapshot, store, cancel)
            .await?;

        if report.is_success() {
            snapshot.config_hash = hash.clone();
        }
        snapshot.add_history(run_entry(RunOperation::Apply, &hash, &report));
        snapshot.serial = store.save(&snapshot, snapshot.serial).await?;

        Ok(report)
    }

    /// Deletes everything recorded in the snapshot, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot operation fails.
    pub async fn destroy(
        &self,
        store: &dyn SnapshotStore,
        cancel: watch::Receiver<bool>,
    ) -> Result<ApplyReport> {
        let Some(mut snapshot) = store.load().await? else {
            info!("Nothing to destroy: no snapshot stored");
            let mut report = ApplyReport::begin();
            report.finish();
            return Ok(report);
        };

        let plan = Planner::new(&self.registry).plan_destroy(&snapshot);
        info!(resources = plan.deletes.len(), "Destroying");

        // Deletes only need the records; an empty declaration set keeps
        // the executor away from create paths and exports.
        let mut empty = self.config.clone();
        empty.resources.clear();
        empty.exports.clear();
        let graph = GraphBuilder.build(&empty)?;
        let resolver = DependencyResolver::new(&graph);

        let executor = ApplyExecutor::new(&self.registry, &self.config.apply);
        let report = executor
            .execute(&empty, &graph, &resolver, &plan, &mut snapshot, store, cancel)
            .await?;

        if report.is_success() {
            store.delete().await?;
        } else {
            snapshot.add_history(run_entry(RunOperation::Destroy, "", &report));
            snapshot.serial = store.save(&snapshot, snapshot.serial).await?;
        }

        Ok(report)
    }

    /// Evaluates the configured exports against the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if no snapshot exists or an export references an
    /// output that was never recorded.
    pub async fn outputs(
        &self,
        store: &dyn SnapshotStore,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let snapshot = store.load().await?.ok_or_else(|| {
            StratusError::State(StateError::NotFound {
                location: store.backend_type().to_string(),
            })
        })?;

        let resolved: HashMap<String, Arc<OutputMap>> = snapshot
            .resources
            .iter()
            .map(|(name, record)| (name.clone(), Arc::new(record.outputs.clone())))
            .collect();

        let mut exports = BTreeMap::new();
        for (name, expr) in &self.config.exports {
            exports.insert(name.clone(), evaluate_expr(expr, &resolved)?);
        }
        Ok(exports)
    }
}

/// Builds the history entry for a finished run.
fn run_entry(operation: RunOperation, config_hash: &str, report: &ApplyReport) -> RunHistoryEntry {
    let touched: Vec<String> = report
        .results
        .iter()
        .filter(|r| !matches!(r.outcome, ResourceOutcome::Unchanged))
        .map(|r| r.name.clone())
        .collect();

    if report.is_success() {
        RunHistoryEntry::new(operation, config_hash, touched)
    } else {
        let first_error = report
            .results
            .iter()
            .find_map(|r| match &r.outcome {
                ResourceOutcome::Failed { error } => Some(error.clone()),
                _ => None,
            })
            .unwrap_or_else(|| String::from("run did not complete"));
        RunHistoryEntry::failed(operation, config_hash, touched, &first_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::outputs::cancel_channel;
    use crate::provider::SimProvider;
    use crate::state::MemorySnapshotStore;

    fn parse(yaml: &str) -> StratusConfig {
        serde_yaml::from_str(yaml).expect("test config should parse")
    }

    fn fast(mut config: StratusConfig) -> StratusConfig {
        config.apply.retry_base_delay_ms = 1;
        config.apply.retry_max_delay_ms = 5;
        config
    }

    fn registry_with(provider: &Arc<SimProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.set_fallback(Arc::clone(provider) as Arc<dyn crate::provider::Provider>);
        registry
    }

    #[tokio::test]
    async fn cyclic_configuration_fails_before_any_provider_call() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: widget
    name: a
    depends_on:
      - b
  - type: widget
    name: b
    depends_on:
      - a
";
        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let reconciler = Reconciler::new(fast(parse(yaml)), registry).unwrap();
        let store = MemorySnapshotStore::new();
        let (_tx, rx) = cancel_channel();

        let result = reconciler.apply(&store, rx).await;

        assert!(matches!(
            result,
            Err(StratusError::Graph(GraphError::Cycle { .. }))
        ));
        assert!(provider.calls().is_empty());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn apply_then_outputs_then_destroy() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
exports:
  group_id: ${rg.id}
resources:
  - type: resource-group
    name: rg
    attributes:
      location: westeurope
";
        let provider = Arc::new(SimProvider::new());
        let reconciler =
            Reconciler::new(fast(parse(yaml)), registry_with(&provider)).unwrap();
        let store = MemorySnapshotStore::new();

        let (_tx, rx) = cancel_channel();
        let report = reconciler.apply(&store, rx).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.exports.len(), 1);

        let exports = reconciler.outputs(&store).await.unwrap();
        assert_eq!(exports["group_id"], report.exports["group_id"]);

        let stored = store.load().await.unwrap().unwrap();
        assert!(!stored.history.is_empty());
        assert!(!stored.config_hash.is_empty());

        let (_tx, rx) = cancel_channel();
        let destroy = reconciler.destroy(&store, rx).await.unwrap();
        assert!(destroy.is_success());
        assert!(!store.exists().await.unwrap());
        assert_eq!(provider.call_count("rg"), 2);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected_at_construction() {
        let yaml = r"
project:
  name: Demo Project
state:
  backend: local
resources: []
";
        let provider = Arc::new(SimProvider::new());
        let result = Reconciler::new(parse(yaml), registry_with(&provider));
        assert!(result.is_err());
    }
}
