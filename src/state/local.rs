//! Local file-based snapshot storage backend.
//!
//! Stores the snapshot as a single JSON file, written atomically via a
//! temporary file and rename. Suitable for local development and
//! single-machine use.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratusError};

use super::store::{check_serial, stamped, SnapshotStore};
use super::types::Snapshot;

/// Default snapshot directory name.
const STATE_DIR: &str = ".stratus";

/// Snapshot file name.
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Local file-based snapshot store.
#[derive(Debug)]
pub struct LocalSnapshotStore {
    /// Base directory for snapshot files.
    base_dir: PathBuf,
    /// Path to the snapshot file.
    snapshot_path: PathBuf,
}

impl LocalSnapshotStore {
    /// Creates a local store rooted at `.stratus/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratusError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a local store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let snapshot_path = base_dir.join(SNAPSHOT_FILE);

        Self {
            base_dir,
            snapshot_path,
        }
    }

    /// Ensures the snapshot directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating snapshot directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StratusError::State(StateError::backend(format!(
                    "Failed to create snapshot directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads and parses the snapshot file if it exists.
    async fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.snapshot_path).await.map_err(|e| {
            StratusError::State(StateError::Corrupted {
                message: format!("Failed to read snapshot file: {e}"),
            })
        })?;

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            StratusError::State(StateError::Corrupted {
                message: format!("Failed to parse snapshot file: {e}"),
            })
        })?;

        Ok(Some(snapshot))
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        if !self.snapshot_path.exists() {
            debug!(
                "Snapshot file does not exist: {}",
                self.snapshot_path.display()
            );
            return Ok(None);
        }

        info!("Loading snapshot from: {}", self.snapshot_path.display());
        self.read_snapshot().await
    }

    async fn save(&self, snapshot: &Snapshot, expected_serial: u64) -> Result<u64> {
        self.ensure_dir().await?;

        let found = self.read_snapshot().await?.map_or(0, |s| s.serial);
        check_serial(expected_serial, found)?;

        let new_serial = expected_serial + 1;
        let content = serde_json::to_string_pretty(&stamped(snapshot, new_serial)).map_err(|e| {
            StratusError::State(StateError::serialization(format!(
                "Failed to serialize snapshot: {e}"
            )))
        })?;

        info!(
            "Saving snapshot serial {new_serial} to: {}",
            self.snapshot_path.display()
        );

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.snapshot_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StratusError::State(StateError::backend(format!(
                "Failed to create temp snapshot file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StratusError::State(StateError::backend(format!(
                "Failed to write snapshot file: {e}"
            )))
        })?;

        file.sync_all().await.map_err(|e| {
            StratusError::State(StateError::backend(format!(
                "Failed to sync snapshot file: {e}"
            )))
        })?;

        fs::rename(&temp_path, &self.snapshot_path)
            .await
            .map_err(|e| {
                StratusError::State(StateError::backend(format!(
                    "Failed to rename snapshot file: {e}"
                )))
            })?;

        debug!("Snapshot saved successfully");
        Ok(new_serial)
    }

    async fn delete(&self) -> Result<()> {
        if self.snapshot_path.exists() {
            info!("Deleting snapshot file: {}", self.snapshot_path.display());
            fs::remove_file(&self.snapshot_path).await.map_err(|e| {
                StratusError::State(StateError::backend(format!(
                    "Failed to delete snapshot file: {e}"
                )))
            })?;
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot_path.exists())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalSnapshotStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalSnapshotStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn save_and_load_bumps_serial() {
        let (store, _temp) = create_test_store();

        let snapshot = Snapshot::new("test-project", "dev");
        let serial = store.save(&snapshot, 0).await.expect("save failed");
        assert_eq!(serial, 1);

        let loaded = store
            .load()
            .await
            .expect("load failed")
            .expect("snapshot should exist");

        assert_eq!(loaded.project, "test-project");
        assert_eq!(loaded.serial, 1);
    }

    #[tokio::test]
    async fn load_nonexistent_returns_none() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn stale_serial_is_rejected() {
        let (store, _temp) = create_test_store();

        let snapshot = Snapshot::new("test-project", "dev");
        store.save(&snapshot, 0).await.expect("first save failed");

        // A second writer still holding serial 0 must be rejected.
        let result = store.save(&snapshot, 0).await;
        match result {
            Err(crate::error::StratusError::State(StateError::StaleState {
                expected,
                found,
            })) => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("expected StaleState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_saves_advance_serial() {
        let (store, _temp) = create_test_store();

        let snapshot = Snapshot::new("test-project", "dev");
        let s1 = store.save(&snapshot, 0).await.expect("save 1 failed");
        let s2 = store.save(&snapshot, s1).await.expect("save 2 failed");
        assert_eq!(s2, 2);

        assert!(store.exists().await.expect("exists check failed"));
        store.delete().await.expect("delete failed");
        assert!(!store.exists().await.expect("exists check failed"));
    }
}
