use snapshot_config::shared::{ExporterConfig, StateStoreConfig};
use snapshot_export::events::TracingEventSink;
use snapshot_export::migrations::apply_offset_store_migrations;
use snapshot_export::orchestrator::ExportOrchestrator;
use snapshot_export::publisher::{KafkaDestination, LogDestination};
use snapshot_export::source::PgSource;
use snapshot_export::store::{MemoryOffsetStore, OffsetStore, PostgresOffsetStore};
use tracing::{error, info, warn};

/// Runs the export described by `config` until every table terminated.
///
/// Returns whether every table completed, or the aggregated errors of the failed tables.
pub async fn run_export(config: ExporterConfig) -> anyhow::Result<bool> {
    let max_connections = u32::try_from(config.export.tables.len()).unwrap_or(u32::MAX);
    let source = PgSource::connect(&config.source, max_connections).await?;
    let destination = KafkaDestination::new(&config.kafka)?;

    // Static dispatch on the checkpoint store.
    match config.state_store {
        StateStoreConfig::Memory => {
            warn!("checkpoints are kept in memory, an interrupted export cannot be resumed");
            start_export(config, source, MemoryOffsetStore::new(), destination).await
        }
        StateStoreConfig::Postgres => {
            apply_offset_store_migrations(&config.source).await?;
            let offset_store = PostgresOffsetStore::connect(&config.source).await?;
            start_export(config, source, offset_store, destination).await
        }
    }
}

async fn start_export<O, D>(
    config: ExporterConfig,
    source: PgSource,
    offset_store: O,
    destination: D,
) -> anyhow::Result<bool>
where
    O: OffsetStore + Clone + Send + Sync + 'static,
    D: LogDestination + Clone + Send + Sync + 'static,
{
    let mut orchestrator = ExportOrchestrator::new(
        config.export,
        source,
        offset_store,
        destination,
        TracingEventSink,
    );
    orchestrator.start()?;

    // Ctrl+C stops every table at its next page boundary.
    let shutdown_tx = orchestrator.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl+c");
            return;
        }

        info!("ctrl+c received, shutting down snapshot export");
        shutdown_tx.shutdown();
    });

    let report = orchestrator.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    for (table, outcome) in report.iter() {
        info!(
            table,
            outcome = outcome.as_str(),
            published = outcome.published(),
            "table export result"
        );
    }

    // Failed tables end the run with their errors aggregated.
    let report = report.into_result()?;

    Ok(report.is_complete())
}
