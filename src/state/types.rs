//! Snapshot types recording the last applied state of every resource.
//!
//! A snapshot is the reconciler's memory: after each run it records, per
//! resource, the provider identity, the attribute expressions that were
//! applied, the resolved values, and the observed outputs. The differ
//! compares declarations against these records on the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::graph::{OutputMap, ResolvedAttrs};

/// Current version of the snapshot document format.
pub const SNAPSHOT_FORMAT: &str = "1.0";

/// The complete persisted state of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot document format version.
    pub format: String,
    /// Monotonic serial, bumped on every successful save. Used as the
    /// compare-and-swap token for concurrent writers.
    pub serial: u64,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last fully applied configuration.
    pub config_hash: String,
    /// Records of individual resources, keyed by logical name.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the snapshot was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent run history.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Record of a single applied resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Logical name (from the declaration).
    pub name: String,
    /// Resource type identifier.
    pub resource_type: String,
    /// Identity assigned by the provider on create.
    pub provider_id: String,
    /// Canonical attribute expressions as declared at apply time.
    /// These are what the differ compares against the next declaration.
    pub attr_exprs: BTreeMap<String, String>,
    /// Attribute values after output resolution, as sent to the provider.
    pub attrs: ResolvedAttrs,
    /// Outputs reported by the provider.
    pub outputs: OutputMap,
    /// Logical names this resource depended on when applied. Kept so
    /// deletes can be ordered even after the declarations are gone.
    pub dependencies: Vec<String>,
    /// Hash of the declaration when applied.
    pub spec_hash: String,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    /// When the run occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of reconciliation runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge towards the declared configuration.
    Apply,
    /// Tear down everything in the snapshot.
    Destroy,
}

impl Snapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            format: SNAPSHOT_FORMAT.to_string(),
            serial: 0,
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource record by logical name.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Adds or updates a resource record.
    pub fn set_resource(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a resource record by logical name.
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns all recorded resource names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Adds a run history entry, keeping only recent entries.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl ResourceRecord {
    /// Creates a fresh record for a newly created resource.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, provider_id: &str, spec_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
            attr_exprs: BTreeMap::new(),
            attrs: ResolvedAttrs::new(),
            outputs: OutputMap::new(),
            dependencies: Vec::new(),
            spec_hash: spec_hash.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the record as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl RunHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_remove_resource_updates_timestamp() {
        let mut snapshot = Snapshot::new("demo", "dev");
        let before = snapshot.last_updated;

        let record = ResourceRecord::new("rg", "resource-group", "rg-123", "abc");
        snapshot.set_resource(record);

        assert!(snapshot.last_updated >= before);
        assert!(snapshot.get_resource("rg").is_some());

        let removed = snapshot.remove_resource("rg");
        assert!(removed.is_some());
        assert!(snapshot.get_resource("rg").is_none());
    }

    #[test]
    fn history_is_capped() {
        let mut snapshot = Snapshot::new("demo", "dev");
        for _ in 0..120 {
            snapshot.add_history(RunHistoryEntry::new(RunOperation::Apply, "h", vec![]));
        }
        assert_eq!(snapshot.history.len(), 100);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snapshot = Snapshot::new("demo", "prod");
        let mut record = ResourceRecord::new("vnet", "virtual-network", "vnet-9", "deadbeef");
        record
            .outputs
            .insert("id".to_string(), serde_json::json!("vnet-9"));
        record.dependencies.push("rg".to_string());
        snapshot.set_resource(record);
        snapshot.serial = 3;

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.serial, 3);
        assert_eq!(parsed.resources["vnet"].dependencies, vec!["rg"]);
        assert_eq!(parsed.resource_names(), vec!["vnet"]);
    }
}
