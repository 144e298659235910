use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use snapshot_config::shared::ExportConfig;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ExportError, ExportResult};
use crate::events::{ExportEventSink, TableExportStatus};
#[cfg(feature = "failpoints")]
use crate::failpoints::{EXPORT_TABLE_BEFORE_CHECKPOINT_FP, export_fail_point};
use crate::metrics::{
    OUTCOME_LABEL, SNAPSHOT_EXPORT_CHECKPOINTS_TOTAL, SNAPSHOT_EXPORT_PAGE_DURATION_SECONDS,
    SNAPSHOT_EXPORT_ROWS_PUBLISHED_TOTAL, SNAPSHOT_EXPORT_TABLES_TOTAL, TABLE_NAME_LABEL,
};
use crate::publisher::{KeyingMode, LogDestination, RecordPublisher, SendOutcome};
use crate::source::FullLoadSource;
use crate::store::OffsetStore;
use crate::types::{
    ChangeRecord, ExecutionId, FullLoadBatch, OffsetState, TableName, TableSchema,
};

/// Terminal outcome of a table export.
#[derive(Debug, Clone, PartialEq)]
pub enum TableExportOutcome {
    /// Every row present at the time of paging was published and checkpointed.
    Completed { published: u64 },
    /// Shutdown was requested; the last checkpoint covers only fully published pages.
    Cancelled { published: u64, percent: u8 },
    Failed { error: ExportError },
}

impl TableExportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableExportOutcome::Completed { .. } => "completed",
            TableExportOutcome::Cancelled { .. } => "cancelled",
            TableExportOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TableExportOutcome::Failed { .. })
    }

    /// Rows published by this run, 0 for failed exports.
    pub fn published(&self) -> u64 {
        match self {
            TableExportOutcome::Completed { published }
            | TableExportOutcome::Cancelled { published, .. } => *published,
            TableExportOutcome::Failed { .. } => 0,
        }
    }
}

/// Destination topic of `table`.
pub fn topic_for(prefix: &str, table: &TableName) -> String {
    format!("{prefix}{}", table.name.to_lowercase())
}

/// Tracks published rows and decides when progress is reported.
#[derive(Debug)]
struct ProgressTracker {
    total: u64,
    interval: u8,
    published: u64,
    last_percent: u8,
}

impl ProgressTracker {
    fn new(total: u64, interval: u8) -> Self {
        Self {
            total,
            interval: interval.max(1),
            published: 0,
            last_percent: 0,
        }
    }

    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }

        let percent = self.published.saturating_mul(100) / self.total;
        percent.min(100) as u8
    }

    fn record_delivered(&mut self) {
        self.published += 1;
    }

    /// Returns the percentage to report after a fully published page, if any.
    ///
    /// A percentage is reported when it differs from the previous one and is a multiple
    /// of the interval.
    fn page_published(&mut self) -> Option<u8> {
        let percent = self.percent();
        if percent == self.last_percent {
            return None;
        }
        self.last_percent = percent;

        (percent % self.interval == 0).then_some(percent)
    }
}

/// Result of publishing the rows of one page.
enum PageOutcome {
    Published,
    Cancelled,
}

/// Exports a single table by paging through it in primary key order.
///
/// A checkpoint is written only after every row of a page has been delivered, so a
/// resumed run never skips rows. Rows of a page that was interrupted are published again
/// on resume.
#[derive(Debug)]
pub struct TableExporter<S, O, D, E> {
    execution_id: ExecutionId,
    table: TableName,
    config: Arc<ExportConfig>,
    source: S,
    offset_store: O,
    destination: D,
    event_sink: E,
    shutdown_rx: ShutdownRx,
}

impl<S, O, D, E> TableExporter<S, O, D, E>
where
    S: FullLoadSource + Send + Sync,
    O: OffsetStore + Send + Sync,
    D: LogDestination + Send + Sync,
    E: ExportEventSink + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: ExecutionId,
        table: TableName,
        config: Arc<ExportConfig>,
        source: S,
        offset_store: O,
        destination: D,
        event_sink: E,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            execution_id,
            table,
            config,
            source,
            offset_store,
            destination,
            event_sink,
            shutdown_rx,
        }
    }

    /// Runs the export to its terminal outcome.
    ///
    /// Errors never escape; they are reported through the event sink and returned as
    /// [`TableExportOutcome::Failed`].
    pub async fn run(mut self) -> TableExportOutcome {
        let outcome = match self.export().await {
            Ok(outcome) => outcome,
            Err(error) => TableExportOutcome::Failed { error },
        };

        let detail = match &outcome {
            TableExportOutcome::Completed { published } => format!("published {published} rows"),
            TableExportOutcome::Cancelled { published, percent } => {
                format!("published {published} rows ({percent}%)")
            }
            TableExportOutcome::Failed { error } => error.to_string(),
        };
        let status = match &outcome {
            TableExportOutcome::Completed { .. } => TableExportStatus::Completed,
            TableExportOutcome::Cancelled { .. } => TableExportStatus::Cancelled,
            TableExportOutcome::Failed { .. } => TableExportStatus::Failed,
        };
        self.event_sink.on_status(&self.table, status, &detail).await;

        counter!(
            SNAPSHOT_EXPORT_TABLES_TOTAL,
            OUTCOME_LABEL => outcome.as_str()
        )
        .increment(1);

        outcome
    }

    async fn export(&mut self) -> ExportResult<TableExportOutcome> {
        let table_schema = Arc::new(self.source.get_table_schema(&self.table).await?);
        let topic = topic_for(&self.config.topic_prefix, &self.table);

        let mut publisher = RecordPublisher::create(
            &self.destination,
            table_schema.clone(),
            topic,
            self.config.serialization,
            KeyingMode::from_send_with_key(self.config.send_with_key),
            Duration::from_millis(self.config.publish_retry_backoff_ms),
        )
        .await?;

        let result = self.export_pages(&mut publisher, &table_schema).await;
        publisher.close().await;

        result
    }

    async fn export_pages(
        &mut self,
        publisher: &mut RecordPublisher<D::Producer>,
        table_schema: &TableSchema,
    ) -> ExportResult<TableExportOutcome> {
        let total = self.source.get_row_count(table_schema).await?;
        let mut progress = ProgressTracker::new(total, self.config.progress_interval_percent);
        let batch_size = self.config.batch_size;

        let mut cursor = match self
            .offset_store
            .get_last_checkpoint(&self.execution_id, &self.table)
            .await?
        {
            OffsetState::NoStoredState => {
                info!(table = %self.table, total, "starting table export");
                self.event_sink
                    .on_status(
                        &self.table,
                        TableExportStatus::Started,
                        &format!("{total} rows to export"),
                    )
                    .await;

                let started = Instant::now();
                let batch = self.source.get_first_batch(table_schema, batch_size).await?;
                match self.publish_page(publisher, &batch, &mut progress).await? {
                    PageOutcome::Published => {}
                    PageOutcome::Cancelled => return Ok(self.cancelled(&progress)),
                }
                self.checkpoint(&batch).await?;
                self.record_page_duration(started);

                if batch.is_last_page(batch_size) {
                    return Ok(self.completed(&progress));
                }

                batch.last_row_key
            }
            OffsetState::Stored(key) => {
                info!(table = %self.table, total, last_key = %key, "resuming table export");
                self.event_sink
                    .on_status(
                        &self.table,
                        TableExportStatus::Resumed,
                        &format!("resuming after key {key}"),
                    )
                    .await;

                Some(key)
            }
        };

        while let Some(after) = cursor.take() {
            if self.shutdown_rx.is_shutdown() {
                info!(table = %self.table, last_key = %after, "shutdown requested, stopping table export");
                return Ok(self.cancelled(&progress));
            }

            let started = Instant::now();
            let batch = self.source.get_batch(table_schema, &after, batch_size).await?;
            match self.publish_page(publisher, &batch, &mut progress).await? {
                PageOutcome::Published => {}
                PageOutcome::Cancelled => return Ok(self.cancelled(&progress)),
            }
            self.checkpoint(&batch).await?;
            self.record_page_duration(started);

            if !batch.is_last_page(batch_size) {
                cursor = batch.last_row_key;
            }
        }

        Ok(self.completed(&progress))
    }

    async fn publish_page(
        &mut self,
        publisher: &mut RecordPublisher<D::Producer>,
        batch: &FullLoadBatch,
        progress: &mut ProgressTracker,
    ) -> ExportResult<PageOutcome> {
        let mut published_in_page = 0u64;
        for record in &batch.records {
            let change = ChangeRecord::insert(
                record.key.clone(),
                record.row.clone(),
                progress.published,
            );

            match publisher.send(&mut self.shutdown_rx, &change).await? {
                SendOutcome::Delivered => {
                    published_in_page += 1;
                    progress.record_delivered();
                }
                SendOutcome::Cancelled => {
                    warn!(
                        table = %self.table,
                        key = %record.key,
                        "shutdown requested while publishing, page will not be checkpointed"
                    );
                    self.record_published(published_in_page);
                    return Ok(PageOutcome::Cancelled);
                }
            }
        }

        self.record_published(published_in_page);
        debug!(table = %self.table, rows = batch.len(), "published page");

        if let Some(percent) = progress.page_published() {
            self.event_sink
                .on_progress(&self.table, percent, progress.published)
                .await;
        }

        Ok(PageOutcome::Published)
    }

    /// Stores the last key of a fully published page; empty pages store nothing.
    async fn checkpoint(&self, batch: &FullLoadBatch) -> ExportResult<()> {
        let Some(last_key) = &batch.last_row_key else {
            return Ok(());
        };

        #[cfg(feature = "failpoints")]
        export_fail_point(EXPORT_TABLE_BEFORE_CHECKPOINT_FP)?;

        self.offset_store
            .store_checkpoint(&self.execution_id, &self.table, last_key)
            .await?;

        counter!(
            SNAPSHOT_EXPORT_CHECKPOINTS_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string()
        )
        .increment(1);
        debug!(table = %self.table, %last_key, "stored checkpoint");

        Ok(())
    }

    fn record_published(&self, rows: u64) {
        counter!(
            SNAPSHOT_EXPORT_ROWS_PUBLISHED_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string()
        )
        .increment(rows);
    }

    fn record_page_duration(&self, started: Instant) {
        histogram!(
            SNAPSHOT_EXPORT_PAGE_DURATION_SECONDS,
            TABLE_NAME_LABEL => self.table.to_string()
        )
        .record(started.elapsed().as_secs_f64());
    }

    fn completed(&self, progress: &ProgressTracker) -> TableExportOutcome {
        info!(
            table = %self.table,
            published = progress.published,
            percent = progress.percent(),
            "table export completed"
        );

        TableExportOutcome::Completed {
            published: progress.published,
        }
    }

    fn cancelled(&self, progress: &ProgressTracker) -> TableExportOutcome {
        TableExportOutcome::Cancelled {
            published: progress.published,
            percent: progress.percent(),
        }
    }
}
