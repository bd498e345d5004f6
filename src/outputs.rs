//! Output propagation engine.
//!
//! Every resource owns one output map, produced asynchronously by its
//! provider call and resolved exactly once per apply. Other nodes hold
//! read-only references to it through [`OutputRegistry`]: requesting a
//! value that is not yet resolved suspends the requester on a watch
//! channel without blocking unrelated branches. Cancellation wakes all
//! pending waiters; values that already resolved stay readable so state
//! reconciliation can still use them.
//!
//! Deferred attribute expressions are evaluated here too: an expression
//! is a pure function of upstream output values, applied once all of
//! them are known.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::spec::{parse_segments, Segment};
use crate::config::{AttrExpr, OutputRef};
use crate::error::{ApplyError, Result, StratusError};
use crate::graph::{OutputMap, ResolvedAttrs, ResourceNode};

/// Creates the global cancellation channel for an apply run.
///
/// Sending `true` wakes every pending output waiter and stops new
/// evaluations from starting.
#[must_use]
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Shared registry of per-node output cells.
#[derive(Debug)]
pub struct OutputRegistry {
    /// One cell per node; `None` until the node's operation commits.
    cells: HashMap<String, watch::Sender<Option<Arc<OutputMap>>>>,
    /// Global cancellation signal.
    cancel: watch::Receiver<bool>,
}

impl OutputRegistry {
    /// Creates a registry with one unresolved cell per node name.
    #[must_use]
    pub fn new<I, S>(names: I, cancel: watch::Receiver<bool>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = names
            .into_iter()
            .map(|name| (name.into(), watch::channel(None).0))
            .collect();
        Self { cells, cancel }
    }

    /// Resolves a node's outputs. Each cell resolves exactly once.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the node is unknown or already resolved.
    pub fn resolve(&self, name: &str, outputs: OutputMap) -> Result<()> {
        let cell = self
            .cells
            .get(name)
            .ok_or_else(|| StratusError::internal(format!("unknown output cell: {name}")))?;

        let previous = cell.send_replace(Some(Arc::new(outputs)));
        if previous.is_some() {
            return Err(StratusError::internal(format!(
                "outputs for '{name}' resolved twice"
            )));
        }
        Ok(())
    }

    /// Returns a node's outputs if they have resolved.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<OutputMap>> {
        self.cells.get(name).and_then(|cell| cell.borrow().clone())
    }

    /// Waits for a node's outputs, suspending until they resolve.
    ///
    /// # Errors
    ///
    /// Returns `ApplyError::Cancelled` if the run is cancelled first.
    pub async fn wait(&self, name: &str) -> Result<Arc<OutputMap>> {
        let cell = self
            .cells
            .get(name)
            .ok_or_else(|| StratusError::internal(format!("unknown output cell: {name}")))?;

        let mut rx = cell.subscribe();
        let mut cancel = self.cancel.clone();

        tokio::select! {
            resolved = rx.wait_for(Option::is_some) => {
                let guard = resolved
                    .map_err(|_| StratusError::internal(format!("output cell for '{name}' dropped")))?;
                Ok(guard
                    .as_ref()
                    .cloned()
                    .unwrap_or_else(|| unreachable!("wait_for guarantees Some")))
            }
            () = wait_cancelled(&mut cancel) => Err(StratusError::Apply(ApplyError::Cancelled)),
        }
    }

    /// Waits for several nodes' outputs, returning them keyed by name.
    ///
    /// # Errors
    ///
    /// Returns `ApplyError::Cancelled` if the run is cancelled first.
    pub async fn wait_all(&self, names: &[String]) -> Result<HashMap<String, Arc<OutputMap>>> {
        let mut resolved = HashMap::with_capacity(names.len());
        for name in names {
            resolved.insert(name.clone(), self.wait(name).await?);
        }
        Ok(resolved)
    }
}

/// Completes when the cancellation signal fires; pends forever if the
/// sender is dropped without cancelling.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|&cancelled| cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Evaluates one attribute expression against resolved upstream outputs.
///
/// A string that is exactly one `${node.output}` reference yields the
/// referenced value unchanged; mixed strings interpolate; arrays and
/// objects are walked recursively.
///
/// # Errors
///
/// Returns an error on malformed placeholders or references to outputs
/// the producer never set.
pub fn evaluate_expr(
    expr: &AttrExpr,
    upstream: &HashMap<String, Arc<OutputMap>>,
) -> Result<serde_json::Value> {
    resolve_value(expr.value(), upstream)
}

/// Evaluates every attribute of a node.
///
/// Callers must already hold all of the node's upstream outputs; the
/// executor guarantees this by only scheduling a node after its
/// dependencies commit.
///
/// # Errors
///
/// Returns an error if any expression fails to evaluate.
pub fn evaluate_attrs(
    node: &ResourceNode,
    upstream: &HashMap<String, Arc<OutputMap>>,
) -> Result<ResolvedAttrs> {
    let mut resolved = ResolvedAttrs::new();
    for (attr, expr) in &node.attributes {
        resolved.insert(attr.clone(), evaluate_expr(expr, upstream)?);
    }
    Ok(resolved)
}

fn resolve_value(
    value: &serde_json::Value,
    upstream: &HashMap<String, Arc<OutputMap>>,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => resolve_string(s, upstream),
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, upstream))
                .collect::<Result<_>>()?,
        )),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, upstream)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    s: &str,
    upstream: &HashMap<String, Arc<OutputMap>>,
) -> Result<serde_json::Value> {
    let segments = parse_segments(s)?;

    // A single whole-string reference keeps the output's raw type.
    if let [Segment::Ref(output_ref)] = segments.as_slice() {
        return lookup(output_ref, upstream).cloned();
    }

    let mut rendered = String::new();
    for segment in &segments {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Ref(output_ref) => {
                let value = lookup(output_ref, upstream)?;
                match value {
                    serde_json::Value::String(text) => rendered.push_str(text),
                    other => rendered.push_str(&other.to_string()),
                }
            }
        }
    }
    Ok(serde_json::Value::String(rendered))
}

fn lookup<'a>(
    output_ref: &OutputRef,
    upstream: &'a HashMap<String, Arc<OutputMap>>,
) -> Result<&'a serde_json::Value> {
    let outputs = upstream.get(&output_ref.node).ok_or_else(|| {
        StratusError::internal(format!(
            "outputs of '{}' are not available for {output_ref}",
            output_ref.node
        ))
    })?;
    outputs.get(&output_ref.output).ok_or_else(|| {
        StratusError::internal(format!(
            "resource '{}' produced no output named '{}'",
            output_ref.node, output_ref.output
        ))
    })
}
