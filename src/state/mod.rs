//! Snapshot persistence: what was applied, where, and with which serial.

mod local;
mod memory;
mod s3;
mod store;
mod types;

pub use local::LocalSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use s3::S3SnapshotStore;
pub use store::{open_store, SnapshotStore};
pub use types::{
    ResourceRecord, RunHistoryEntry, RunOperation, Snapshot, SNAPSHOT_FORMAT,
};
