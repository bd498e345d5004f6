//! Apply run reporting.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Final status of one resource after an apply run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    /// The resource was created.
    Created {
        /// Transient retries performed across its provider calls.
        retries: u32,
    },
    /// The resource was updated in place.
    Updated {
        /// Transient retries performed across its provider calls.
        retries: u32,
    },
    /// The resource was destroyed and recreated.
    Replaced {
        /// Transient retries performed across its provider calls.
        retries: u32,
    },
    /// The resource was deleted.
    Deleted {
        /// Transient retries performed across its provider calls.
        retries: u32,
    },
    /// Nothing to do; declaration and record already agreed.
    Unchanged,
    /// Every attempt failed, or the provider failed fatally.
    Failed {
        /// The final error message.
        error: String,
    },
    /// Not attempted because an upstream dependency failed.
    Skipped {
        /// The upstream resource whose failure caused the skip.
        failed_dependency: String,
    },
    /// Not attempted because the run was cancelled.
    Cancelled,
}

/// Outcome entry for one resource.
#[derive(Debug, Clone)]
pub struct ResourceResult {
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// What happened.
    pub outcome: ResourceOutcome,
}

/// Report of a full apply or destroy run.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Per-resource outcomes, in completion order.
    pub results: Vec<ResourceResult>,
    /// Export values evaluated after the run. Empty when exports could
    /// not be resolved (e.g. after failures).
    pub exports: BTreeMap<String, serde_json::Value>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl ApplyReport {
    /// Starts an empty report stamped with the current time.
    #[must_use]
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            results: Vec::new(),
            exports: BTreeMap::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Records an outcome for a resource.
    pub fn record(
        &mut self,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        outcome: ResourceOutcome,
    ) {
        self.results.push(ResourceResult {
            name: name.into(),
            resource_type: resource_type.into(),
            outcome,
        });
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Finds the result for a resource.
    #[must_use]
    pub fn result(&self, name: &str) -> Option<&ResourceResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Number of resources that changed (created, updated, replaced, or
    /// deleted).
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    ResourceOutcome::Created { .. }
                        | ResourceOutcome::Updated { .. }
                        | ResourceOutcome::Replaced { .. }
                        | ResourceOutcome::Deleted { .. }
                )
            })
            .count()
    }

    /// Number of failed resources.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Failed { .. }))
            .count()
    }

    /// Number of skipped resources.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Skipped { .. }))
            .count()
    }

    /// Number of cancelled resources.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Cancelled))
            .count()
    }

    /// Returns true if every resource ended well.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0 && self.skipped_count() == 0 && self.cancelled_count() == 0
    }
}

impl std::fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created { .. } => write!(f, "created"),
            Self::Updated { .. } => write!(f, "updated"),
            Self::Replaced { .. } => write!(f, "replaced"),
            Self::Deleted { .. } => write!(f, "deleted"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped { failed_dependency } => {
                write!(f, "skipped (dependency '{failed_dependency}' failed)")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
