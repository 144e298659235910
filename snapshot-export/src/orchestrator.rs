use std::collections::BTreeMap;
use std::sync::Arc;

use snapshot_config::shared::ExportConfig;
use tracing::{info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::events::ExportEventSink;
use crate::publisher::LogDestination;
use crate::source::FullLoadSource;
use crate::store::OffsetStore;
use crate::types::{ExecutionId, TableName};
use crate::workers::pool::ExportWorkerPool;
use crate::workers::table_export::{TableExportOutcome, TableExporter};

#[derive(Debug)]
enum OrchestratorState {
    NotStarted,
    Started { pool: ExportWorkerPool },
}

/// Outcomes of every table export of a run, keyed by qualified table name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    outcomes: BTreeMap<String, TableExportOutcome>,
}

impl ExportReport {
    /// Returns the outcome of `table`, given as `schema.table` or `table`.
    pub fn get(&self, table: &str) -> Option<&TableExportOutcome> {
        self.outcomes.get(&TableName::parse(table).to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableExportOutcome)> {
        self.outcomes
            .iter()
            .map(|(table, outcome)| (table.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.values().any(TableExportOutcome::is_failed)
    }

    /// Returns whether every table export completed.
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .values()
            .all(|outcome| matches!(outcome, TableExportOutcome::Completed { .. }))
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(table, _)| table)
            .collect()
    }

    /// Returns the report if no table failed, otherwise the errors of every failed table
    /// aggregated into one error.
    pub fn into_result(self) -> ExportResult<ExportReport> {
        let errors: Vec<ExportError> = self
            .outcomes
            .values()
            .filter_map(|outcome| match outcome {
                TableExportOutcome::Failed { error } => Some(error.clone()),
                _ => None,
            })
            .collect();

        if errors.is_empty() {
            return Ok(self);
        }

        Err(ExportError::from(errors))
    }

    /// Rows published by this run across all tables.
    pub fn total_published(&self) -> u64 {
        self.outcomes.values().map(TableExportOutcome::published).sum()
    }
}

/// Runs the full load of every configured table concurrently.
///
/// Each table is exported by its own task; the failure of one table does not affect the
/// others. A shutdown request is observed by every table at its next page boundary or
/// publish retry.
#[derive(Debug)]
pub struct ExportOrchestrator<S, O, D, E> {
    config: Arc<ExportConfig>,
    source: S,
    offset_store: O,
    destination: D,
    event_sink: E,
    state: OrchestratorState,
    shutdown_tx: ShutdownTx,
}

impl<S, O, D, E> ExportOrchestrator<S, O, D, E>
where
    S: FullLoadSource + Clone + Send + Sync + 'static,
    O: OffsetStore + Clone + Send + Sync + 'static,
    D: LogDestination + Clone + Send + Sync + 'static,
    E: ExportEventSink + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: ExportConfig,
        source: S,
        offset_store: O,
        destination: D,
        event_sink: E,
    ) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            offset_store,
            destination,
            event_sink,
            state: OrchestratorState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.config.execution_id
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Spawns one export task per configured table and returns without waiting for them.
    ///
    /// Must be called from within a Tokio runtime. Tables listed more than once are
    /// exported once.
    pub fn start(&mut self) -> ExportResult<()> {
        if let OrchestratorState::Started { .. } = self.state {
            bail!(
                ErrorKind::InvalidState,
                "The export was already started",
                self.config.execution_id.clone()
            );
        }

        info!(
            execution_id = %self.config.execution_id,
            tables = self.config.tables.len(),
            "starting snapshot export"
        );

        let execution_id = ExecutionId::new(self.config.execution_id.clone());
        let mut pool = ExportWorkerPool::new();
        for table in &self.config.tables {
            let table = TableName::parse(table);
            if pool.contains(&table) {
                warn!(%table, "table listed more than once, exporting it once");
                continue;
            }

            let exporter = TableExporter::new(
                execution_id.clone(),
                table.clone(),
                self.config.clone(),
                self.source.clone(),
                self.offset_store.clone(),
                self.destination.clone(),
                self.event_sink.clone(),
                self.shutdown_tx.subscribe(),
            );
            pool.spawn(table, exporter.run());
        }

        self.state = OrchestratorState::Started { pool };

        Ok(())
    }

    /// Returns whether every launched table export terminated; true when none was launched.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            OrchestratorState::NotStarted => true,
            OrchestratorState::Started { pool } => pool.is_finished(),
        }
    }

    /// Waits for every table export and returns their outcomes.
    pub async fn wait(self) -> ExportReport {
        let OrchestratorState::Started { pool } = self.state else {
            info!("snapshot export was not started, nothing to wait for");

            return ExportReport::default();
        };

        info!(workers = pool.len(), "waiting for table exports to complete");

        let report = ExportReport {
            outcomes: pool.wait_all().await,
        };

        let failed = report.failed_tables();
        if failed.is_empty() {
            info!(
                execution_id = %self.config.execution_id,
                published = report.total_published(),
                "snapshot export finished"
            );
        } else {
            warn!(
                execution_id = %self.config.execution_id,
                published = report.total_published(),
                failed = ?failed,
                "snapshot export finished with failed tables"
            );
        }

        report
    }

    /// Requests every table export to stop at its next cancellation point.
    pub fn shutdown(&self) {
        info!("shutting down snapshot export");
        self.shutdown_tx.shutdown();
    }

    pub async fn shutdown_and_wait(self) -> ExportReport {
        self.shutdown();
        self.wait().await
    }
}
