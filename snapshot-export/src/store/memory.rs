use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::store::OffsetStore;
use crate::types::{ExecutionId, OffsetState, PrimaryKeyValue, TableName};

type CheckpointKey = (ExecutionId, TableName);

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<CheckpointKey, PrimaryKeyValue>,
    /// Every checkpoint written, in write order.
    history: HashMap<CheckpointKey, Vec<PrimaryKeyValue>>,
    failing_writes: HashSet<TableName>,
}

/// In-memory checkpoint store.
///
/// Keeps the full write history so tests can assert on checkpoint ordering.
#[derive(Debug, Clone, Default)]
pub struct MemoryOffsetStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every checkpoint written for `table`, oldest first.
    pub async fn checkpoint_history(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
    ) -> Vec<PrimaryKeyValue> {
        let inner = self.inner.lock().await;
        inner
            .history
            .get(&(execution_id.clone(), table.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every checkpoint write for `table` fail.
    pub async fn fail_writes_for(&self, table: TableName) {
        let mut inner = self.inner.lock().await;
        inner.failing_writes.insert(table);
    }
}

impl OffsetStore for MemoryOffsetStore {
    async fn get_last_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
    ) -> ExportResult<OffsetState> {
        let inner = self.inner.lock().await;
        let state = match inner
            .checkpoints
            .get(&(execution_id.clone(), table.clone()))
        {
            Some(key) => OffsetState::Stored(key.clone()),
            None => OffsetState::NoStoredState,
        };

        Ok(state)
    }

    async fn store_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
        key: &PrimaryKeyValue,
    ) -> ExportResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.failing_writes.contains(table) {
            bail!(
                ErrorKind::CheckpointStoreFailed,
                "Injected checkpoint write failure",
                table.to_string()
            );
        }

        let checkpoint_key = (execution_id.clone(), table.clone());
        inner
            .history
            .entry(checkpoint_key.clone())
            .or_default()
            .push(key.clone());
        inner.checkpoints.insert(checkpoint_key, key.clone());

        Ok(())
    }
}
