//! Concurrent plan execution.
//!
//! Deletes run first, sequentially, dependents before dependencies. The
//! remaining operations run concurrently under a semaphore: an operation
//! starts as soon as every dependency has committed, and its resolved
//! outputs are published through the output registry for downstream
//! attribute evaluation. The snapshot is committed after every completed
//! operation from the coordinator loop, so a crash loses at most the
//! in-flight calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ApplyConfig, ReplaceStrategy, SpecHasher, StratusConfig};
use crate::error::{ApplyError, Result, StratusError};
use crate::graph::{
    DependencyResolver, OutputMap, ResolvedAttrs, ResourceGraph, ResourceNode,
};
use crate::outputs::{evaluate_attrs, evaluate_expr, OutputRegistry};
use crate::planner::{ChangeKind, Plan, PlannedOp};
use crate::provider::ProviderRegistry;
use crate::state::{ResourceRecord, Snapshot, SnapshotStore};

use super::report::{ApplyReport, ResourceOutcome};
use super::retry::RetryPolicy;

/// What a worker task hands back to the coordinator.
struct TaskSuccess {
    kind: ChangeKind,
    provider_id: String,
    outputs: OutputMap,
    attrs: ResolvedAttrs,
    retries: u32,
}

/// Executes plans against providers and commits progress to the snapshot.
pub struct ApplyExecutor<'a> {
    registry: &'a ProviderRegistry,
    settings: &'a ApplyConfig,
}

impl<'a> ApplyExecutor<'a> {
    /// Creates an executor.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry, settings: &'a ApplyConfig) -> Self {
        Self { registry, settings }
    }

    /// Applies the plan, mutating and committing the snapshot as work
    /// completes.
    ///
    /// Individual resource failures are captured in the report, not
    /// returned as errors; the run itself only fails on snapshot commit
    /// errors (including a stale serial) or internal faults.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot commit fails or a worker panics.
    #[allow(clippy::too_many_lines)]
    pub async fn execute(
        &self,
        config: &StratusConfig,
        graph: &ResourceGraph,
        resolver: &DependencyResolver,
        plan: &Plan,
        snapshot: &mut Snapshot,
        store: &dyn SnapshotStore,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::begin();
        let policy = RetryPolicy::from_config(self.settings);

        self.run_deletes(plan, snapshot, store, &mut cancel, policy, &mut report)
            .await?;

        // Internal cancel signal: fed by the external one, and by a fatal
        // failure when continue_on_error is off.
        let (cancel_tx, cancel_rx) = watch::channel(*cancel.borrow());

        let names: Vec<String> = plan.ops.iter().map(|op| op.name.clone()).collect();
        let outputs = Arc::new(OutputRegistry::new(names, cancel_rx.clone()));

        let ops_by_name: HashMap<&str, &PlannedOp> =
            plan.ops.iter().map(|op| (op.name.as_str(), op)).collect();

        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let mut join_set: JoinSet<(String, Result<TaskSuccess>)> = JoinSet::new();

        // Successfully finished names; their outputs are resolved.
        let mut completed: HashSet<String> = HashSet::new();
        // In-flight, failed, skipped, or cancelled names.
        let mut withheld: HashSet<String> = HashSet::new();
        let mut external_alive = true;

        self.schedule(
            graph,
            resolver,
            snapshot,
            &ops_by_name,
            &outputs,
            &semaphore,
            &cancel_rx,
            policy,
            &mut join_set,
            &mut completed,
            &mut withheld,
            &mut report,
        )?;

        while !join_set.is_empty() {
            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    let (name, result) = joined
                        .map_err(|e| StratusError::internal(format!("apply worker panicked: {e}")))?;
                    withheld.remove(&name);

                    match result {
                        Ok(success) => {
                            self.commit_success(config, graph, snapshot, store, &name, &success)
                                .await?;
                            let resource_type = graph
                                .node(&name)
                                .map_or_else(String::new, |n| n.id.resource_type.clone());
                            report.record(&name, resource_type, outcome_for(&success));
                            outputs.resolve(&name, success.outputs)?;
                            completed.insert(name);

                            self.schedule(
                                graph, resolver, snapshot, &ops_by_name, &outputs,
                                &semaphore, &cancel_rx, policy,
                                &mut join_set, &mut completed, &mut withheld, &mut report,
                            )?;
                        }
                        Err(StratusError::Apply(ApplyError::Cancelled)) => {
                            debug!(resource = %name, "Operation cancelled");
                            withheld.insert(name.clone());
                            report.record(
                                &name,
                                resource_type_of(graph, &name),
                                ResourceOutcome::Cancelled,
                            );
                        }
                        Err(err) => {
                            warn!(resource = %name, "Operation failed: {err}");
                            report.record(
                                &name,
                                resource_type_of(graph, &name),
                                ResourceOutcome::Failed {
                                    error: err.to_string(),
                                },
                            );

                            // Everything downstream can no longer run.
                            for dependent in resolver.transitive_dependents(&name) {
                                if !completed.contains(dependent) && !withheld.contains(dependent) {
                                    report.record(
                                        dependent,
                                        resource_type_of(graph, dependent),
                                        ResourceOutcome::Skipped {
                                            failed_dependency: name.clone(),
                                        },
                                    );
                                    withheld.insert(dependent.to_string());
                                }
                            }
                            withheld.insert(name);

                            if !self.settings.continue_on_error {
                                info!("Stopping after failure (continue_on_error is off)");
                                cancel_tx.send_replace(true);
                            }
                        }
                    }
                }
                changed = cancel.changed(), if external_alive => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            info!("Cancellation requested, stopping scheduling");
                            cancel_tx.send_replace(true);
                        }
                        Ok(()) => {}
                        Err(_) => external_alive = false,
                    }
                }
            }
        }

        // Anything never scheduled is either skipped (already recorded) or
        // starved by cancellation.
        for op in &plan.ops {
            if !completed.contains(&op.name) && !withheld.contains(&op.name) {
                report.record(&op.name, &op.resource_type, ResourceOutcome::Cancelled);
            }
        }

        if report.is_success() {
            self.evaluate_exports(config, &outputs, &completed, &mut report);
        }

        report.finish();
        Ok(report)
    }

    /// Runs the delete phase sequentially, dependents first.
    async fn run_deletes(
        &self,
        plan: &Plan,
        snapshot: &mut Snapshot,
        store: &dyn SnapshotStore,
        cancel: &mut watch::Receiver<bool>,
        policy: RetryPolicy,
        report: &mut ApplyReport,
    ) -> Result<()> {
        // A failed delete leaves its dependencies unreachable: record them
        // as skipped instead of attempting deletes that would dangle.
        let recorded_deps: HashMap<String, Vec<String>> = plan
            .deletes
            .iter()
            .filter_map(|d| {
                snapshot
                    .get_resource(&d.name)
                    .map(|r| (d.name.clone(), r.dependencies.clone()))
            })
            .collect();
        let mut blocked: HashMap<String, String> = HashMap::new();

        for delete in &plan.deletes {
            if *cancel.borrow() {
                report.record(&delete.name, &delete.resource_type, ResourceOutcome::Cancelled);
                continue;
            }
            if let Some(failed) = blocked.get(&delete.name) {
                report.record(
                    &delete.name,
                    &delete.resource_type,
                    ResourceOutcome::Skipped {
                        failed_dependency: failed.clone(),
                    },
                );
                continue;
            }

            let outcome = match self.registry.provider(&delete.resource_type) {
                Ok(provider) => {
                    let id = crate::graph::ResourceId::new(&delete.resource_type, &delete.name);
                    let provider_id = delete.provider_id.clone();
                    policy
                        .run(&delete.name, cancel, || provider.delete(&id, &provider_id))
                        .await
                        .map(|((), retries)| retries)
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(retries) => {
                    info!(resource = %delete.name, "Deleted");
                    snapshot.remove_resource(&delete.name);
                    self.commit(snapshot, store).await?;
                    report.record(
                        &delete.name,
                        &delete.resource_type,
                        ResourceOutcome::Deleted { retries },
                    );
                }
                Err(StratusError::Apply(ApplyError::Cancelled)) => {
                    report.record(&delete.name, &delete.resource_type, ResourceOutcome::Cancelled);
                }
                Err(err) => {
                    warn!(resource = %delete.name, "Delete failed: {err}");
                    report.record(
                        &delete.name,
                        &delete.resource_type,
                        ResourceOutcome::Failed {
                            error: err.to_string(),
                        },
                    );
                    block_dependencies(&delete.name, &recorded_deps, &mut blocked);
                }
            }
        }

        Ok(())
    }

    /// Starts every operation whose dependencies have all committed.
    #[allow(clippy::too_many_arguments)]
    fn schedule(
        &self,
        graph: &ResourceGraph,
        resolver: &DependencyResolver,
        snapshot: &Snapshot,
        ops_by_name: &HashMap<&str, &PlannedOp>,
        outputs: &Arc<OutputRegistry>,
        semaphore: &Arc<Semaphore>,
        cancel: &watch::Receiver<bool>,
        policy: RetryPolicy,
        join_set: &mut JoinSet<(String, Result<TaskSuccess>)>,
        completed: &mut HashSet<String>,
        withheld: &mut HashSet<String>,
        report: &mut ApplyReport,
    ) -> Result<()> {
        // No-op completions unlock further work without spawning, so keep
        // sweeping until the runnable set stops moving.
        loop {
            let runnable: Vec<String> = resolver
                .runnable(completed, withheld)
                .into_iter()
                .map(str::to_string)
                .collect();
            if runnable.is_empty() {
                return Ok(());
            }

            let mut progressed = false;
            for name in runnable {
                let Some(op) = ops_by_name.get(name.as_str()) else {
                    // Declared but not planned: defensive, should not happen.
                    withheld.insert(name);
                    continue;
                };

                if op.kind == ChangeKind::NoOp {
                    let record = snapshot.get_resource(&name).ok_or_else(|| {
                        StratusError::internal(format!(
                            "no snapshot record for unchanged resource '{name}'"
                        ))
                    })?;
                    outputs.resolve(&name, record.outputs.clone())?;
                    report.record(&name, &op.resource_type, ResourceOutcome::Unchanged);
                    completed.insert(name);
                    progressed = true;
                    continue;
                }

                self.spawn_op(graph, snapshot, op, outputs, semaphore, cancel, policy, join_set)?;
                withheld.insert(name);
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Spawns one provider-touching operation.
    #[allow(clippy::too_many_arguments)]
    fn spawn_op(
        &self,
        graph: &ResourceGraph,
        snapshot: &Snapshot,
        op: &PlannedOp,
        outputs: &Arc<OutputRegistry>,
        semaphore: &Arc<Semaphore>,
        cancel: &watch::Receiver<bool>,
        policy: RetryPolicy,
        join_set: &mut JoinSet<(String, Result<TaskSuccess>)>,
    ) -> Result<()> {
        let node: ResourceNode = graph
            .node(&op.name)
            .ok_or_else(|| StratusError::internal(format!("planned op for unknown node '{}'", op.name)))?
            .clone();
        let provider = self.registry.provider(&node.id.resource_type)?;

        // Dependencies have committed, so every upstream cell is resolved.
        let mut upstream: HashMap<String, Arc<OutputMap>> = HashMap::new();
        for dep in &node.dependencies {
            let dep_outputs = outputs.get(dep).ok_or_else(|| {
                StratusError::internal(format!("outputs for dependency '{dep}' not resolved"))
            })?;
            upstream.insert(dep.clone(), dep_outputs);
        }

        let kind = op.kind;
        let strategy = op.replace;
        let old_provider_id = snapshot.get_resource(&op.name).map(|r| r.provider_id.clone());
        let semaphore = Arc::clone(semaphore);
        let mut cancel = cancel.clone();

        debug!(resource = %node.id, op = %kind, "Scheduling");

        join_set.spawn(async move {
            let name = node.id.name.clone();
            let result = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| StratusError::internal("apply semaphore closed"))?;

                let attrs = evaluate_attrs(&node, &upstream)?;
                let id = &node.id;
                let mut retries = 0u32;

                let applied = match kind {
                    ChangeKind::Create => {
                        let (applied, r) = policy
                            .run(&id.name, &mut cancel, || provider.create(id, &attrs))
                            .await?;
                        retries += r;
                        applied
                    }
                    ChangeKind::Update => {
                        let pid = old_provider_id.clone().ok_or_else(|| {
                            StratusError::internal(format!("update of '{id}' has no recorded identity"))
                        })?;
                        let (applied, r) = policy
                            .run(&id.name, &mut cancel, || provider.update(id, &pid, &attrs))
                            .await?;
                        retries += r;
                        applied
                    }
                    ChangeKind::Replace => {
                        let pid = old_provider_id.clone().ok_or_else(|| {
                            StratusError::internal(format!("replace of '{id}' has no recorded identity"))
                        })?;
                        match strategy {
                            ReplaceStrategy::DeleteThenCreate => {
                                let ((), r) = policy
                                    .run(&id.name, &mut cancel, || provider.delete(id, &pid))
                                    .await?;
                                retries += r;
                                let (applied, r) = policy
                                    .run(&id.name, &mut cancel, || provider.create(id, &attrs))
                                    .await?;
                                retries += r;
                                applied
                            }
                            ReplaceStrategy::CreateThenDelete => {
                                let (applied, r) = policy
                                    .run(&id.name, &mut cancel, || provider.create(id, &attrs))
                                    .await?;
                                retries += r;
                                let ((), r) = policy
                                    .run(&id.name, &mut cancel, || provider.delete(id, &pid))
                                    .await?;
                                retries += r;
                                applied
                            }
                        }
                    }
                    ChangeKind::NoOp | ChangeKind::Delete => {
                        return Err(StratusError::internal(format!(
                            "operation '{kind}' is not executed by a worker"
                        )));
                    }
                };

                Ok(TaskSuccess {
                    kind,
                    provider_id: applied.provider_id,
                    outputs: applied.outputs,
                    attrs,
                    retries,
                })
            }
            .await;
            (name, result)
        });

        Ok(())
    }

    /// Writes the completed operation into the snapshot and commits it.
    async fn commit_success(
        &self,
        config: &StratusConfig,
        graph: &ResourceGraph,
        snapshot: &mut Snapshot,
        store: &dyn SnapshotStore,
        name: &str,
        success: &TaskSuccess,
    ) -> Result<()> {
        let node = graph
            .node(name)
            .ok_or_else(|| StratusError::internal(format!("no graph node for '{name}'")))?;

        let mut record = snapshot.get_resource(name).cloned().unwrap_or_else(|| {
            ResourceRecord::new(name, &node.id.resource_type, &success.provider_id, "")
        });
        record.resource_type = node.id.resource_type.clone();
        record.provider_id = success.provider_id.clone();
        record.attr_exprs = node
            .attributes
            .iter()
            .map(|(attr, expr)| (attr.clone(), expr.canonical()))
            .collect();
        record.attrs = success.attrs.clone();
        record.outputs = success.outputs.clone();
        record.dependencies = node.dependencies.clone();
        if let Some(decl) = config.resource(name) {
            record.spec_hash = SpecHasher.hash_resource(decl);
        }
        record.touch();

        snapshot.set_resource(record);
        self.commit(snapshot, store).await
    }

    /// Commits the snapshot under its current serial.
    async fn commit(&self, snapshot: &mut Snapshot, store: &dyn SnapshotStore) -> Result<()> {
        let new_serial = store.save(snapshot, snapshot.serial).await?;
        snapshot.serial = new_serial;
        Ok(())
    }

    /// Evaluates configured exports once every resource has committed.
    fn evaluate_exports(
        &self,
        config: &StratusConfig,
        outputs: &OutputRegistry,
        completed: &HashSet<String>,
        report: &mut ApplyReport,
    ) {
        if config.exports.is_empty() {
            return;
        }

        let resolved: HashMap<String, Arc<OutputMap>> = completed
            .iter()
            .filter_map(|name| outputs.get(name).map(|o| (name.clone(), o)))
            .collect();

        for (export, expr) in &config.exports {
            match evaluate_expr(expr, &resolved) {
                Ok(value) => {
                    report.exports.insert(export.clone(), value);
                }
                Err(err) => warn!(export, "Export could not be evaluated: {err}"),
            }
        }
    }
}

/// Friendly outcome for a completed worker.
fn outcome_for(success: &TaskSuccess) -> ResourceOutcome {
    match success.kind {
        ChangeKind::Update => ResourceOutcome::Updated {
            retries: success.retries,
        },
        ChangeKind::Replace => ResourceOutcome::Replaced {
            retries: success.retries,
        },
        _ => ResourceOutcome::Created {
            retries: success.retries,
        },
    }
}

fn resource_type_of(graph: &ResourceGraph, name: &str) -> String {
    graph
        .node(name)
        .map_or_else(String::new, |n| n.id.resource_type.clone())
}

/// Marks every recorded dependency of `failed` (transitively, within the
/// delete set) as blocked by it.
fn block_dependencies(
    failed: &str,
    recorded_deps: &HashMap<String, Vec<String>>,
    blocked: &mut HashMap<String, String>,
) {
    let mut stack: Vec<&str> = recorded_deps
        .get(failed)
        .map_or_else(Vec::new, |deps| deps.iter().map(String::as_str).collect());

    while let Some(dep) = stack.pop() {
        if !recorded_deps.contains_key(dep) || blocked.contains_key(dep) {
            continue;
        }
        blocked.insert(dep.to_string(), failed.to_string());
        if let Some(next) = recorded_deps.get(dep) {
            stack.extend(next.iter().map(String::as_str));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::outputs::cancel_channel;
    use crate::planner::Planner;
    use crate::provider::{ResourcePolicy, SimProvider};
    use crate::state::MemorySnapshotStore;

    fn settings() -> ApplyConfig {
        ApplyConfig {
            parallelism: 4,
            max_retries: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            continue_on_error: true,
        }
    }

    fn registry_with(provider: &Arc<SimProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.set_fallback(Arc::clone(provider) as Arc<dyn crate::provider::Provider>);
        registry
    }

    fn parse(yaml: &str) -> StratusConfig {
        serde_yaml::from_str(yaml).expect("test config should parse")
    }

    async fn apply_with(
        config: &StratusConfig,
        registry: &ProviderRegistry,
        store: &MemorySnapshotStore,
    ) -> (ApplyReport, Snapshot) {
        let graph = GraphBuilder.build(config).unwrap();
        let resolver = DependencyResolver::new(&graph);
        let mut snapshot = store
            .load()
            .await
            .unwrap()
            .unwrap_or_else(|| Snapshot::new("demo", "dev"));
        let hash = SpecHasher.hash_config(config);
        let plan = Planner::new(registry).plan(config, &graph, &resolver, &snapshot, &hash);

        let settings = settings();
        let executor = ApplyExecutor::new(registry, &settings);
        let (_cancel_tx, cancel_rx) = cancel_channel();
        let report = executor
            .execute(config, &graph, &resolver, &plan, &mut snapshot, store, cancel_rx)
            .await
            .unwrap();
        (report, snapshot)
    }

    const CHAIN: &str = r#"
project:
  name: demo
state:
  backend: local
exports:
  cluster_subnet: ${c.subnet}
resources:
  - type: resource-group
    name: a
    attributes:
      location: westeurope
  - type: virtual-network
    name: b
    attributes:
      group: ${a.name}
  - type: managed-cluster
    name: c
    attributes:
      subnet: ${b.id}
"#;

    #[tokio::test]
    async fn chain_applies_in_dependency_order_and_resolves_outputs() {
        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();
        let config = parse(CHAIN);

        let (report, snapshot) = apply_with(&config, &registry, &store).await;

        assert!(report.is_success());
        assert_eq!(report.changed_count(), 3);

        let calls = provider.calls();
        let order: Vec<&str> = calls.iter().map(|c| c.resource.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        // c's deferred attribute resolved to b's provider identity.
        let b_id = snapshot.get_resource("b").unwrap().provider_id.clone();
        assert_eq!(
            snapshot.get_resource("c").unwrap().attrs["subnet"],
            serde_json::Value::String(b_id.clone())
        );
        assert_eq!(
            report.exports["cluster_subnet"],
            serde_json::Value::String(b_id)
        );
        // Three commits, one per resource.
        assert_eq!(snapshot.serial, 3);
    }

    #[tokio::test]
    async fn fatal_failure_skips_dependents_but_not_siblings() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: widget
    name: d
  - type: widget
    name: e
  - type: widget
    name: f
    depends_on:
      - d
";
        let provider = Arc::new(SimProvider::new());
        provider.fail_fatal("d");
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();
        let config = parse(yaml);

        let (report, snapshot) = apply_with(&config, &registry, &store).await;

        assert!(matches!(
            report.result("d").unwrap().outcome,
            ResourceOutcome::Failed { .. }
        ));
        assert!(matches!(
            report.result("f").unwrap().outcome,
            ResourceOutcome::Skipped { ref failed_dependency } if failed_dependency == "d"
        ));
        assert!(matches!(
            report.result("e").unwrap().outcome,
            ResourceOutcome::Created { .. }
        ));

        // The skipped resource never reached the provider.
        assert_eq!(provider.call_count("f"), 0);
        // The sibling's work was still committed.
        assert!(snapshot.get_resource("e").is_some());
        assert!(snapshot.get_resource("d").is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_counted() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: widget
    name: f
";
        let provider = Arc::new(SimProvider::new());
        provider.fail_transient("f", 2);
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();
        let config = parse(yaml);

        let (report, _snapshot) = apply_with(&config, &registry, &store).await;

        assert!(matches!(
            report.result("f").unwrap().outcome,
            ResourceOutcome::Created { retries: 2 }
        ));
        assert_eq!(provider.call_count("f"), 3);
    }

    #[tokio::test]
    async fn reapplying_an_unchanged_config_touches_nothing() {
        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();
        let config = parse(CHAIN);

        let (first, _) = apply_with(&config, &registry, &store).await;
        assert!(first.is_success());
        let calls_after_first = provider.calls().len();

        let (second, _) = apply_with(&config, &registry, &store).await;
        assert!(second.is_success());
        assert_eq!(second.changed_count(), 0);
        assert!(second
            .results
            .iter()
            .all(|r| r.outcome == ResourceOutcome::Unchanged));
        assert_eq!(provider.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn immutable_change_replaces_delete_then_create() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
    attributes:
      location: northeurope
";
        let provider = Arc::new(SimProvider::new());
        let mut registry = registry_with(&provider);
        registry.register_policy(
            "resource-group",
            ResourcePolicy::with_immutable(["location"]),
        );
        let config = parse(yaml);

        // Seed a record applied with a different location.
        let mut seed = Snapshot::new("demo", "dev");
        let mut record = ResourceRecord::new("rg", "resource-group", "old-pid", "h");
        record.attr_exprs.insert(
            "location".to_string(),
            crate::config::AttrExpr::string("westeurope").canonical(),
        );
        seed.set_resource(record);
        let store = MemorySnapshotStore::new();
        store.save(&seed, 0).await.unwrap();

        let (report, snapshot) = apply_with(&config, &registry, &store).await;

        assert!(matches!(
            report.result("rg").unwrap().outcome,
            ResourceOutcome::Replaced { .. }
        ));
        let ops: Vec<&str> = provider.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec!["delete", "create"]);
        assert_ne!(snapshot.get_resource("rg").unwrap().provider_id, "old-pid");
    }

    #[tokio::test]
    async fn removed_resources_are_deleted_dependents_first() {
        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();

        let (_report, _snapshot) = apply_with(&parse(CHAIN), &registry, &store).await;

        let empty = parse(
            r"
project:
  name: demo
state:
  backend: local
resources: []
",
        );
        let (report, snapshot) = apply_with(&empty, &registry, &store).await;

        assert!(report.is_success());
        assert!(snapshot.resources.is_empty());
        let calls = provider.calls();
        let deletes: Vec<&str> = calls
            .iter()
            .filter(|c| c.op == "delete")
            .map(|c| c.resource.as_str())
            .collect();
        assert_eq!(deletes, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn upstream_update_reresolves_downstream_deferred_attributes() {
        let v1 = r"
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
      group_location: ${rg.location}
";
        let v2 = v1.replace("location: westeurope", "location: northeurope");

        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let store = MemorySnapshotStore::new();

        let (first, snapshot) = apply_with(&parse(v1), &registry, &store).await;
        assert!(first.is_success());
        assert_eq!(
            snapshot.get_resource("vnet").unwrap().attrs["group_location"],
            serde_json::json!("westeurope")
        );

        // vnet's expression is textually unchanged, but rg's new outputs
        // must still flow through it.
        let (second, snapshot) = apply_with(&parse(&v2), &registry, &store).await;
        assert!(second.is_success());
        assert!(matches!(
            second.result("vnet").unwrap().outcome,
            ResourceOutcome::Updated { .. }
        ));
        assert_eq!(
            snapshot.get_resource("vnet").unwrap().attrs["group_location"],
            serde_json::json!("northeurope")
        );
    }

    #[tokio::test]
    async fn immutable_change_replaces_create_then_delete() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: resource-group
    name: rg
    replace: create-then-delete
    attributes:
      location: northeurope
";
        let provider = Arc::new(SimProvider::new());
        let mut registry = registry_with(&provider);
        registry.register_policy(
            "resource-group",
            ResourcePolicy::with_immutable(["location"]),
        );
        let config = parse(yaml);

        let mut seed = Snapshot::new("demo", "dev");
        let mut record = ResourceRecord::new("rg", "resource-group", "old-pid", "h");
        record.attr_exprs.insert(
            "location".to_string(),
            crate::config::AttrExpr::string("westeurope").canonical(),
        );
        seed.set_resource(record);
        let store = MemorySnapshotStore::new();
        store.save(&seed, 0).await.unwrap();

        let (report, snapshot) = apply_with(&config, &registry, &store).await;

        assert!(matches!(
            report.result("rg").unwrap().outcome,
            ResourceOutcome::Replaced { .. }
        ));
        let ops: Vec<&str> = provider.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec!["create", "delete"]);
        assert_ne!(snapshot.get_resource("rg").unwrap().provider_id, "old-pid");
    }

    #[tokio::test]
    async fn cancellation_stops_pending_work_but_keeps_commits() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: widget
    name: a
  - type: widget
    name: b
    depends_on:
      - a
  - type: widget
    name: c
    depends_on:
      - b
";
        let provider = Arc::new(SimProvider::new());
        // b parks in a long retry backoff; the cancel signal lands there.
        provider.fail_transient("b", 1);
        let registry = registry_with(&provider);
        let config = parse(yaml);

        let graph = GraphBuilder.build(&config).unwrap();
        let resolver = DependencyResolver::new(&graph);
        let store = MemorySnapshotStore::new();
        let mut snapshot = Snapshot::new("demo", "dev");
        let plan = Planner::new(&registry).plan(&config, &graph, &resolver, &snapshot, "h");

        let settings = ApplyConfig {
            parallelism: 4,
            max_retries: 3,
            retry_base_delay_ms: 60_000,
            retry_max_delay_ms: 60_000,
            continue_on_error: true,
        };
        let executor = ApplyExecutor::new(&registry, &settings);

        let (cancel_tx, cancel_rx) = cancel_channel();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
        });

        let report = executor
            .execute(&config, &graph, &resolver, &plan, &mut snapshot, &store, cancel_rx)
            .await
            .unwrap();

        assert!(matches!(
            report.result("a").unwrap().outcome,
            ResourceOutcome::Created { .. }
        ));
        assert_eq!(report.result("b").unwrap().outcome, ResourceOutcome::Cancelled);
        assert_eq!(report.result("c").unwrap().outcome, ResourceOutcome::Cancelled);
        assert_eq!(provider.call_count("c"), 0);

        // a's commit survived the cancellation.
        let stored = store.load().await.unwrap().unwrap();
        assert!(stored.get_resource("a").is_some());
        assert!(stored.get_resource("b").is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_serial_aborts_the_run() {
        let yaml = r"
project:
  name: demo
state:
  backend: local
resources:
  - type: widget
    name: w
";
        let provider = Arc::new(SimProvider::new());
        let registry = registry_with(&provider);
        let config = parse(yaml);

        // Another writer already advanced the stored serial to 1.
        let store = MemorySnapshotStore::new();
        store.save(&Snapshot::new("demo", "dev"), 0).await.unwrap();

        // This run still holds a serial-0 view.
        let mut stale = Snapshot::new("demo", "dev");
        let graph = GraphBuilder.build(&config).unwrap();
        let resolver = DependencyResolver::new(&graph);
        let plan = Planner::new(&registry).plan(&config, &graph, &resolver, &stale, "h");

        let settings = settings();
        let executor = ApplyExecutor::new(&registry, &settings);
        let (_cancel_tx, cancel_rx) = cancel_channel();
        let result = executor
            .execute(&config, &graph, &resolver, &plan, &mut stale, &store, cancel_rx)
            .await;

        assert!(matches!(
            result,
            Err(StratusError::State(crate::error::StateError::StaleState {
                expected: 0,
                found: 1
            }))
        ));
    }
}
