use fail::FailScenario;
use serde_json::Value;
use snapshot_config::shared::ExportConfig;
use snapshot_export::error::ErrorKind;
use snapshot_export::events::MemoryEventSink;
use snapshot_export::failpoints::EXPORT_TABLE_BEFORE_CHECKPOINT_FP;
use snapshot_export::orchestrator::{ExportOrchestrator, ExportReport};
use snapshot_export::publisher::MemoryDestination;
use snapshot_export::source::MemorySource;
use snapshot_export::store::MemoryOffsetStore;
use snapshot_export::types::{
    Cell, ColumnSchema, ColumnType, ExecutionId, PrimaryKeyValue, TableName, TableRow,
    TableSchema,
};
use snapshot_export::workers::table_export::TableExportOutcome;
use snapshot_telemetry::tracing::init_test_tracing;

async fn orders_source(count: i64) -> MemorySource {
    let schema = TableSchema::new(
        TableName::parse("orders"),
        vec![
            ColumnSchema::new("id", ColumnType::Int8, false),
            ColumnSchema::new("status", ColumnType::Text, false),
        ],
        vec![0],
    )
    .unwrap();
    let rows = (1..=count)
        .map(|id| TableRow::new(vec![Cell::I64(id), Cell::String("paid".to_string())]))
        .collect();

    let source = MemorySource::new();
    source.add_table(schema, rows).await.unwrap();

    source
}

async fn export_orders(
    source: &MemorySource,
    store: &MemoryOffsetStore,
    destination: &MemoryDestination,
) -> ExportReport {
    let mut config = ExportConfig::new("run-1", vec!["orders".to_string()]);
    config.batch_size = 100;

    let mut orchestrator = ExportOrchestrator::new(
        config,
        source.clone(),
        store.clone(),
        destination.clone(),
        MemoryEventSink::new(),
    );
    orchestrator.start().unwrap();
    orchestrator.wait().await
}

#[tokio::test(flavor = "multi_thread")]
async fn page_published_before_a_failed_checkpoint_is_published_again() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(EXPORT_TABLE_BEFORE_CHECKPOINT_FP, "1*off->1*return").unwrap();

    let orders = TableName::parse("orders");
    let source = orders_source(250).await;
    let store = MemoryOffsetStore::new();
    let destination = MemoryDestination::new();

    // The second page is published but its checkpoint is never written.
    let report = export_orders(&source, &store, &destination).await;

    let Some(TableExportOutcome::Failed { error }) = report.get("orders") else {
        panic!("expected the export to fail at the failpoint");
    };
    assert_eq!(error.kind(), ErrorKind::InjectedFailure);
    assert_eq!(destination.messages().await.len(), 200);
    assert_eq!(
        store
            .checkpoint_history(&ExecutionId::new("run-1"), &orders)
            .await,
        vec![PrimaryKeyValue::int(100)]
    );

    fail::remove(EXPORT_TABLE_BEFORE_CHECKPOINT_FP);

    // The rerun resumes after the first page, so rows 101..=200 are delivered twice.
    let report = export_orders(&source, &store, &destination).await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 150 })
    );
    let ids: Vec<i64> = destination
        .messages()
        .await
        .iter()
        .map(|message| {
            let record: Value = serde_json::from_slice(&message.payload).unwrap();
            record["data"]["id"].as_i64().unwrap()
        })
        .collect();
    let expected: Vec<i64> = (1..=200).chain(101..=250).collect();
    assert_eq!(ids, expected);

    scenario.teardown();
}
