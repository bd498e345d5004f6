//! In-memory snapshot store, used in tests and dry runs.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

use super::store::{check_serial, stamped, SnapshotStore};
use super::types::Snapshot;

/// Snapshot store that keeps everything in memory.
///
/// Implements the same serial semantics as the persistent backends, so
/// executor and reconciler tests exercise the real stale-write path.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with a snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot, expected_serial: u64) -> Result<u64> {
        let mut guard = self.inner.lock().await;

        let found = guard.as_ref().map_or(0, |s| s.serial);
        check_serial(expected_serial, found)?;

        let new_serial = expected_serial + 1;
        *guard = Some(stamped(snapshot, new_serial));
        Ok(new_serial)
    }

    async fn delete(&self) -> Result<()> {
        *self.inner.lock().await = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.inner.lock().await.is_some())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StateError, StratusError};

    #[tokio::test]
    async fn serial_semantics_match_persistent_backends() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_none());

        let snapshot = Snapshot::new("demo", "dev");
        let s1 = store.save(&snapshot, 0).await.unwrap();
        assert_eq!(s1, 1);

        let stale = store.save(&snapshot, 0).await;
        assert!(matches!(
            stale,
            Err(StratusError::State(StateError::StaleState {
                expected: 0,
                found: 1
            }))
        ));

        store.delete().await.unwrap();
        assert!(!store.exists().await.unwrap());
    }
}
