//! State store: durable SQLite entities plus an ephemeral TTL cache for
//! snapshots, checkpoints and live progress.

mod cache;
mod db;
mod snapshot;

pub use cache::{EphemeralCache, MemoryCache};
pub use db::SqliteStore;
pub use snapshot::{
    Checkpoint, ErrorContext, ExecutionSnapshot, SnapshotStore, checkpoint_key, cleanup_key,
    error_key, progress_key, snapshot_key,
};

use crate::alerts::{Alert, AlertSink, NewAlert};
use crate::errors::StoreError;

impl AlertSink for SqliteStore {
    fn emit(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        self.create_alert(alert)
    }
}
