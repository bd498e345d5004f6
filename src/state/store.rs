//! Snapshot store trait and backend selection.
//!
//! All backends implement optimistic concurrency: a save carries the serial
//! the caller read, and the store rejects the write if the persisted serial
//! has moved on. There are no lock files; a concurrent writer simply loses
//! the race and gets [`StateError::StaleState`].

use async_trait::async_trait;

use crate::config::{StateBackend, StateConfig};
use crate::error::{Result, StateError, StratusError};

use super::local::LocalSnapshotStore;
use super::s3::S3SnapshotStore;
use super::types::Snapshot;

/// Persistent storage for project snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the current snapshot, or `None` if nothing is stored yet.
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Saves the snapshot, guarded by a compare-and-swap on the serial.
    ///
    /// `expected_serial` is the serial of the snapshot the caller loaded
    /// (0 when nothing was stored). The snapshot is persisted with serial
    /// `expected_serial + 1`, which is returned on success.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StaleState`] when the persisted serial no
    /// longer matches `expected_serial`.
    async fn save(&self, snapshot: &Snapshot, expected_serial: u64) -> Result<u64>;

    /// Deletes the stored snapshot.
    async fn delete(&self) -> Result<()>;

    /// Checks whether a snapshot is stored.
    async fn exists(&self) -> Result<bool>;

    /// Returns the backend type name for diagnostics.
    fn backend_type(&self) -> &'static str;
}

/// Opens the snapshot store described by the configuration.
///
/// # Errors
///
/// Returns an error if the backend configuration is incomplete or the
/// backend cannot be initialized.
pub async fn open_store(config: &StateConfig) -> Result<Box<dyn SnapshotStore>> {
    match config.backend {
        StateBackend::Local => {
            let store = match &config.path {
                Some(path) => LocalSnapshotStore::with_base_dir(path),
                None => LocalSnapshotStore::new()?,
            };
            Ok(Box::new(store))
        }
        StateBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                StratusError::State(StateError::backend(
                    "S3 backend requires a bucket name in state.bucket",
                ))
            })?;
            let store =
                S3SnapshotStore::new(bucket, config.prefix.as_deref(), config.region.as_deref())
                    .await?;
            Ok(Box::new(store))
        }
    }
}

/// Verifies a persisted serial against the one the caller read.
///
/// Shared by every backend so the stale-write check stays uniform.
pub(super) fn check_serial(expected: u64, found: u64) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StratusError::State(StateError::StaleState {
            expected,
            found,
        }))
    }
}

/// Clones the snapshot with the post-save serial filled in.
pub(super) fn stamped(snapshot: &Snapshot, new_serial: u64) -> Snapshot {
    let mut stamped = snapshot.clone();
    stamped.serial = new_serial;
    stamped
}
