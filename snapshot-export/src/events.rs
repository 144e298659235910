//! Progress and status notifications emitted by table exports.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::types::TableName;

/// Lifecycle status of a table export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableExportStatus {
    /// The export starts from the first page.
    Started,
    /// The export continues after a stored checkpoint.
    Resumed,
    Completed,
    Cancelled,
    Failed,
}

impl TableExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableExportStatus::Started => "started",
            TableExportStatus::Resumed => "resumed",
            TableExportStatus::Completed => "completed",
            TableExportStatus::Cancelled => "cancelled",
            TableExportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TableExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of table export notifications.
///
/// Implementations are shared by every table export of a run and must tolerate
/// concurrent calls.
pub trait ExportEventSink {
    /// Called when the published percentage of `table` reaches a new reporting step.
    fn on_progress(
        &self,
        table: &TableName,
        percent: u8,
        published: u64,
    ) -> impl Future<Output = ()> + Send;

    /// Called on every lifecycle transition of `table`.
    fn on_status(
        &self,
        table: &TableName,
        status: TableExportStatus,
        detail: &str,
    ) -> impl Future<Output = ()> + Send;
}

/// Emits notifications as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ExportEventSink for TracingEventSink {
    async fn on_progress(&self, table: &TableName, percent: u8, published: u64) {
        info!(table = %table, percent, published, "table export progress");
    }

    async fn on_status(&self, table: &TableName, status: TableExportStatus, detail: &str) {
        match status {
            TableExportStatus::Failed => {
                error!(table = %table, %status, detail, "table export status changed")
            }
            TableExportStatus::Cancelled => {
                warn!(table = %table, %status, detail, "table export status changed")
            }
            _ => info!(table = %table, %status, detail, "table export status changed"),
        }
    }
}

/// A notification recorded by [`MemoryEventSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    Progress {
        table: TableName,
        percent: u8,
        published: u64,
    },
    Status {
        table: TableName,
        status: TableExportStatus,
        detail: String,
    },
}

/// Records notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<ExportEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ExportEvent> {
        self.events.lock().await.clone()
    }

    /// Returns the reported percentages of `table`, in emission order.
    pub async fn progress_of(&self, table: &TableName) -> Vec<u8> {
        let events = self.events.lock().await;
        events
            .iter()
            .filter_map(|event| match event {
                ExportEvent::Progress {
                    table: event_table,
                    percent,
                    ..
                } if event_table == table => Some(*percent),
                _ => None,
            })
            .collect()
    }

    /// Returns the statuses of `table`, in emission order.
    pub async fn statuses_of(&self, table: &TableName) -> Vec<TableExportStatus> {
        let events = self.events.lock().await;
        events
            .iter()
            .filter_map(|event| match event {
                ExportEvent::Status {
                    table: event_table,
                    status,
                    ..
                } if event_table == table => Some(*status),
                _ => None,
            })
            .collect()
    }
}

impl ExportEventSink for MemoryEventSink {
    async fn on_progress(&self, table: &TableName, percent: u8, published: u64) {
        let mut events = self.events.lock().await;
        events.push(ExportEvent::Progress {
            table: table.clone(),
            percent,
            published,
        });
    }

    async fn on_status(&self, table: &TableName, status: TableExportStatus, detail: &str) {
        let mut events = self.events.lock().await;
        events.push(ExportEvent::Status {
            table: table.clone(),
            status,
            detail: detail.to_string(),
        });
    }
}
