use std::collections::BTreeMap;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::ErrorKind;
use crate::export_error;
use crate::types::TableName;
use crate::workers::table_export::TableExportOutcome;

/// Tasks of the table exports of one run.
///
/// Every table export runs in its own task, so a panic in one of them is contained and
/// reported as that table's outcome.
#[derive(Debug, Default)]
pub struct ExportWorkerPool {
    workers: Vec<(TableName, JoinHandle<TableExportOutcome>)>,
}

impl ExportWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the export of `table` on the current runtime.
    pub fn spawn<F>(&mut self, table: TableName, future: F)
    where
        F: Future<Output = TableExportOutcome> + Send + 'static,
    {
        debug!(%table, "spawned table export worker");
        self.workers.push((table, tokio::spawn(future)));
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.workers.iter().any(|(name, _)| name == table)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns whether every spawned worker has terminated.
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Waits for every worker and collects their outcomes by qualified table name.
    pub async fn wait_all(self) -> BTreeMap<String, TableExportOutcome> {
        let mut outcomes = BTreeMap::new();

        for (table, handle) in self.workers {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!(%table, error = %join_err, "table export worker did not complete");

                    let description = if join_err.is_panic() {
                        "Table export worker panicked"
                    } else {
                        "Table export worker was aborted"
                    };
                    TableExportOutcome::Failed {
                        error: export_error!(
                            ErrorKind::TableExportWorkerPanic,
                            description,
                            join_err
                        ),
                    }
                }
            };

            outcomes.insert(table.to_string(), outcome);
        }

        outcomes
    }
}
