//! Metric names and labels emitted by the exporter.

/// Label for the qualified table name.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the terminal outcome of a table export.
pub const OUTCOME_LABEL: &str = "outcome";

/// Counter of change records delivered to the log.
pub const SNAPSHOT_EXPORT_ROWS_PUBLISHED_TOTAL: &str = "snapshot_export_rows_published_total";

/// Counter of publish attempts that failed transiently and were retried.
pub const SNAPSHOT_EXPORT_PUBLISH_RETRIES_TOTAL: &str = "snapshot_export_publish_retries_total";

/// Histogram of the time spent fetching, publishing and checkpointing one page.
pub const SNAPSHOT_EXPORT_PAGE_DURATION_SECONDS: &str = "snapshot_export_page_duration_seconds";

/// Counter of checkpoints written.
pub const SNAPSHOT_EXPORT_CHECKPOINTS_TOTAL: &str = "snapshot_export_checkpoints_total";

/// Counter of table exports by terminal outcome.
pub const SNAPSHOT_EXPORT_TABLES_TOTAL: &str = "snapshot_export_tables_total";
