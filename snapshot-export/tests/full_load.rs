use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use snapshot_config::shared::{ExportConfig, SerializationMode};
use snapshot_export::concurrency::shutdown::ShutdownTx;
use snapshot_export::error::ErrorKind;
use snapshot_export::events::{ExportEventSink, MemoryEventSink, TableExportStatus};
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

fn table_schema(name: &str) -> TableSchema {
    TableSchema::new(
        TableName::parse(name),
        vec![
            ColumnSchema::new("id", ColumnType::Int8, false),
            ColumnSchema::new("description", ColumnType::Text, false),
            ColumnSchema::new("amount", ColumnType::Numeric, true),
        ],
        vec![0],
    )
    .unwrap()
}

fn rows(count: i64) -> Vec<TableRow> {
    (1..=count)
        .map(|id| {
            TableRow::new(vec![
                Cell::I64(id),
                Cell::String(format!("row {id}")),
                if id % 2 == 0 {
                    Cell::Numeric(format!("{id}.50"))
                } else {
                    Cell::Null
                },
            ])
        })
        .collect()
}

async fn source_with(tables: &[(&str, i64)]) -> MemorySource {
    let source = MemorySource::new();
    for (name, count) in tables {
        source
            .add_table(table_schema(name), rows(*count))
            .await
            .unwrap();
    }

    source
}

fn export_config(execution_id: &str, tables: &[&str], batch_size: usize) -> ExportConfig {
    let mut config = ExportConfig::new(
        execution_id,
        tables.iter().map(|table| table.to_string()).collect(),
    );
    config.batch_size = batch_size;
    config.publish_retry_backoff_ms = 5;

    config
}

async fn run_export<E>(
    config: ExportConfig,
    source: &MemorySource,
    store: &MemoryOffsetStore,
    destination: &MemoryDestination,
    event_sink: E,
) -> ExportReport
where
    E: ExportEventSink + Clone + Send + Sync + 'static,
{
    let mut orchestrator = ExportOrchestrator::new(
        config,
        source.clone(),
        store.clone(),
        destination.clone(),
        event_sink,
    );
    orchestrator.start().unwrap();

    tokio::time::timeout(Duration::from_secs(30), orchestrator.wait())
        .await
        .expect("export did not finish in time")
}

async fn published_keys(destination: &MemoryDestination, topic: &str) -> Vec<i64> {
    destination
        .topic_messages(topic)
        .await
        .iter()
        .map(|message| {
            let record: Value = serde_json::from_slice(&message.payload).unwrap();
            record["data"]["id"].as_i64().unwrap()
        })
        .collect()
}

fn keys(ids: impl IntoIterator<Item = i64>) -> Vec<PrimaryKeyValue> {
    ids.into_iter().map(PrimaryKeyValue::int).collect()
}

/// Requests shutdown once a table reports the given percentage.
#[derive(Debug, Clone)]
struct ShutdownAtProgress {
    events: MemoryEventSink,
    shutdown_tx: Arc<OnceLock<ShutdownTx>>,
    percent: u8,
}

impl ShutdownAtProgress {
    fn new(percent: u8) -> Self {
        Self {
            events: MemoryEventSink::new(),
            shutdown_tx: Arc::new(OnceLock::new()),
            percent,
        }
    }

    fn attach(&self, shutdown_tx: ShutdownTx) {
        self.shutdown_tx.set(shutdown_tx).unwrap();
    }
}

impl ExportEventSink for ShutdownAtProgress {
    async fn on_progress(&self, table: &TableName, percent: u8, published: u64) {
        self.events.on_progress(table, percent, published).await;
        if percent == self.percent
            && let Some(shutdown_tx) = self.shutdown_tx.get()
        {
            shutdown_tx.shutdown();
        }
    }

    async fn on_status(&self, table: &TableName, status: TableExportStatus, detail: &str) {
        self.events.on_status(table, status, detail).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn orders_are_exported_in_pages_and_customers_as_one_empty_page() {
    init_test_tracing();
    let source = source_with(&[("orders", 250), ("customers", 0)]).await;
    let store = MemoryOffsetStore::new();
    let destination = MemoryDestination::new();
    let config = export_config("run-1", &["orders", "customers"], 100);

    let report = run_export(config, &source, &store, &destination, MemoryEventSink::new()).await;

    assert!(report.is_complete());
    assert!(report.clone().into_result().is_ok());
    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 250 })
    );
    assert_eq!(
        report.get("customers"),
        Some(&TableExportOutcome::Completed { published: 0 })
    );

    let orders = TableName::parse("orders");
    let customers = TableName::parse("customers");
    assert_eq!(
        source.page_requests(&orders).await,
        vec![
            None,
            Some(PrimaryKeyValue::int(100)),
            Some(PrimaryKeyValue::int(200))
        ]
    );
    assert_eq!(source.page_requests(&customers).await, vec![None]);

    assert_eq!(
        published_keys(&destination, "orders").await,
        (1..=250).collect::<Vec<_>>()
    );
    assert!(destination.topic_messages("customers").await.is_empty());

    let execution_id = ExecutionId::new("run-1");
    assert_eq!(
        store.checkpoint_history(&execution_id, &orders).await,
        keys([100, 200, 250])
    );
    assert!(
        store
            .checkpoint_history(&execution_id, &customers)
            .await
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn records_carry_insert_type_and_run_sequence() {
    init_test_tracing();
    let source = source_with(&[("orders", 3)]).await;
    let destination = MemoryDestination::new();
    let config = export_config("run-1", &["orders"], 2);

    run_export(
        config,
        &source,
        &MemoryOffsetStore::new(),
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    let records: Vec<Value> = destination
        .topic_messages("orders")
        .await
        .iter()
        .map(|message| serde_json::from_slice(&message.payload).unwrap())
        .collect();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["change_type"], "INSERT");
    assert_eq!(records[0]["change_key"], "1");
    assert_eq!(records[0]["lsn"], "00000000000000000000");
    assert_eq!(records[2]["seq_val"], "00000000000000000002");
    assert_eq!(records[1]["data"]["amount"], "2.50");
    assert_eq!(records[2]["data"]["amount"], Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn page_equal_to_batch_size_is_followed_by_an_empty_page() {
    init_test_tracing();
    let source = source_with(&[("orders", 200)]).await;
    let store = MemoryOffsetStore::new();
    let config = export_config("run-1", &["orders"], 100);

    let report = run_export(
        config,
        &source,
        &store,
        &MemoryDestination::new(),
        MemoryEventSink::new(),
    )
    .await;

    let orders = TableName::parse("orders");
    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 200 })
    );
    assert_eq!(
        source.page_requests(&orders).await,
        vec![
            None,
            Some(PrimaryKeyValue::int(100)),
            Some(PrimaryKeyValue::int(200))
        ]
    );
    assert_eq!(
        store
            .checkpoint_history(&ExecutionId::new("run-1"), &orders)
            .await,
        keys([100, 200])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_export_resumes_after_the_last_checkpoint() {
    init_test_tracing();
    let orders = TableName::parse("orders");
    let store = MemoryOffsetStore::new();

    // The third page fetch fails after two pages were published and checkpointed.
    let failing_source = source_with(&[("orders", 250)]).await;
    failing_source.fail_pages_after(orders.clone(), 2).await;
    let first_destination = MemoryDestination::new();
    let report = run_export(
        export_config("run-1", &["orders"], 100),
        &failing_source,
        &store,
        &first_destination,
        MemoryEventSink::new(),
    )
    .await;

    let Some(TableExportOutcome::Failed { error }) = report.get("orders") else {
        panic!("expected the first run to fail");
    };
    assert_eq!(error.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(
        published_keys(&first_destination, "orders").await,
        (1..=200).collect::<Vec<_>>()
    );

    let source = source_with(&[("orders", 250)]).await;
    let destination = MemoryDestination::new();
    let events = MemoryEventSink::new();
    let report = run_export(
        export_config("run-1", &["orders"], 100),
        &source,
        &store,
        &destination,
        events.clone(),
    )
    .await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 50 })
    );
    assert_eq!(
        source.page_requests(&orders).await,
        vec![Some(PrimaryKeyValue::int(200))]
    );
    assert_eq!(
        published_keys(&destination, "orders").await,
        (201..=250).collect::<Vec<_>>()
    );
    assert_eq!(
        events.statuses_of(&orders).await,
        vec![TableExportStatus::Resumed, TableExportStatus::Completed]
    );
    assert_eq!(
        store
            .checkpoint_history(&ExecutionId::new("run-1"), &orders)
            .await,
        keys([100, 200, 250])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn other_execution_id_starts_from_the_first_page() {
    init_test_tracing();
    let source = source_with(&[("orders", 30)]).await;
    let store = MemoryOffsetStore::new();

    run_export(
        export_config("run-1", &["orders"], 10),
        &source,
        &store,
        &MemoryDestination::new(),
        MemoryEventSink::new(),
    )
    .await;

    let destination = MemoryDestination::new();
    let report = run_export(
        export_config("run-2", &["orders"], 10),
        &source,
        &store,
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 30 })
    );
    assert_eq!(destination.topic_messages("orders").await.len(), 30);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_at_the_next_page_boundary_and_resumes_from_there() {
    init_test_tracing();
    let orders = TableName::parse("orders");
    let source = source_with(&[("orders", 1000)]).await;
    let store = MemoryOffsetStore::new();
    let destination = MemoryDestination::new();

    let event_sink = ShutdownAtProgress::new(20);
    let mut orchestrator = ExportOrchestrator::new(
        export_config("run-1", &["orders"], 100),
        source.clone(),
        store.clone(),
        destination.clone(),
        event_sink.clone(),
    );
    event_sink.attach(orchestrator.shutdown_tx());
    orchestrator.start().unwrap();
    let report = orchestrator.wait().await;

    // Shutdown is requested while the last row of the second page is reported, the page
    // is still checkpointed before the export stops.
    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Cancelled {
            published: 200,
            percent: 20
        })
    );
    assert_eq!(
        store
            .checkpoint_history(&ExecutionId::new("run-1"), &orders)
            .await,
        keys([100, 200])
    );
    assert_eq!(destination.topic_messages("orders").await.len(), 200);
    assert_eq!(
        event_sink.events.statuses_of(&orders).await,
        vec![TableExportStatus::Started, TableExportStatus::Cancelled]
    );

    let report = run_export(
        export_config("run-1", &["orders"], 100),
        &source,
        &store,
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 800 })
    );
    assert_eq!(
        published_keys(&destination, "orders").await,
        (1..=1000).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_is_reported_once_per_interval_step() {
    init_test_tracing();
    let orders = TableName::parse("orders");
    let source = source_with(&[("orders", 1000)]).await;
    let events = MemoryEventSink::new();

    run_export(
        export_config("run-1", &["orders"], 100),
        &source,
        &MemoryOffsetStore::new(),
        &MemoryDestination::new(),
        events.clone(),
    )
    .await;

    assert_eq!(
        events.progress_of(&orders).await,
        vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
    );
    assert_eq!(
        events.statuses_of(&orders).await,
        vec![TableExportStatus::Started, TableExportStatus::Completed]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_is_evaluated_after_each_page() {
    init_test_tracing();
    let orders = TableName::parse("orders");
    let source = source_with(&[("orders", 1000)]).await;
    let events = MemoryEventSink::new();

    let report = run_export(
        export_config("run-1", &["orders"], 150),
        &source,
        &MemoryOffsetStore::new(),
        &MemoryDestination::new(),
        events.clone(),
    )
    .await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 1000 })
    );
    assert_eq!(events.progress_of(&orders).await, vec![30, 60, 90, 100]);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_publish_retries_writes_no_checkpoint() {
    init_test_tracing();
    let orders = TableName::parse("orders");
    let source = source_with(&[("orders", 10)]).await;
    let store = MemoryOffsetStore::new();
    let destination = MemoryDestination::new();
    destination.fail_transiently_forever("orders").await;

    let mut orchestrator = ExportOrchestrator::new(
        export_config("run-1", &["orders"], 5),
        source.clone(),
        store.clone(),
        destination.clone(),
        MemoryEventSink::new(),
    );
    let shutdown_tx = orchestrator.shutdown_tx();
    orchestrator.start().unwrap();

    while destination.produce_attempts("orders").await < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!orchestrator.is_finished());
    shutdown_tx.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait())
        .await
        .unwrap();

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Cancelled {
            published: 0,
            percent: 0
        })
    );
    assert!(destination.messages().await.is_empty());
    assert!(
        store
            .checkpoint_history(&ExecutionId::new("run-1"), &orders)
            .await
            .is_empty()
    );
    assert_eq!(destination.producers_closed().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_publish_failures_do_not_lose_rows() {
    init_test_tracing();
    let source = source_with(&[("orders", 20)]).await;
    let destination = MemoryDestination::new();
    destination.fail_transiently("orders", 4).await;

    let report = run_export(
        export_config("run-1", &["orders"], 5),
        &source,
        &MemoryOffsetStore::new(),
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 20 })
    );
    assert_eq!(
        published_keys(&destination, "orders").await,
        (1..=20).collect::<Vec<_>>()
    );
    assert_eq!(destination.produce_attempts("orders").await, 24);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_tables_do_not_affect_the_others() {
    init_test_tracing();
    let source = source_with(&[("orders", 120), ("payments", 30), ("refunds", 10)]).await;
    source.fail_schema_lookup(TableName::parse("broken")).await;
    let store = MemoryOffsetStore::new();
    store.fail_writes_for(TableName::parse("payments")).await;
    let destination = MemoryDestination::new();
    destination.fail_fatally("refunds").await;
    let events = MemoryEventSink::new();

    let report = run_export(
        export_config(
            "run-1",
            &["orders", "broken", "payments", "refunds", "missing"],
            50,
        ),
        &source,
        &store,
        &destination,
        events.clone(),
    )
    .await;

    assert_eq!(report.len(), 5);
    assert!(report.has_failures());
    assert_eq!(
        report.get("orders"),
        Some(&TableExportOutcome::Completed { published: 120 })
    );
    assert_eq!(
        published_keys(&destination, "orders").await,
        (1..=120).collect::<Vec<_>>()
    );

    let failure_kind = |table: &str| match report.get(table) {
        Some(TableExportOutcome::Failed { error }) => error.kind(),
        other => panic!("expected {table} to fail, got {other:?}"),
    };
    assert_eq!(failure_kind("broken"), ErrorKind::SourceSchemaError);
    assert_eq!(failure_kind("payments"), ErrorKind::CheckpointStoreFailed);
    assert_eq!(failure_kind("refunds"), ErrorKind::PublishFailed);
    assert_eq!(failure_kind("missing"), ErrorKind::MissingTableSchema);
    assert_eq!(
        report.failed_tables(),
        vec![
            "public.broken",
            "public.missing",
            "public.payments",
            "public.refunds"
        ]
    );
    let error = report.clone().into_result().unwrap_err();
    assert_eq!(
        error.kinds(),
        vec![
            ErrorKind::SourceSchemaError,
            ErrorKind::MissingTableSchema,
            ErrorKind::CheckpointStoreFailed,
            ErrorKind::PublishFailed
        ]
    );

    // Payments published its first page before the checkpoint write failed.
    assert_eq!(destination.topic_messages("payments").await.len(), 30);
    assert!(destination.topic_messages("refunds").await.is_empty());
    assert_eq!(
        events.statuses_of(&TableName::parse("broken")).await,
        vec![TableExportStatus::Failed]
    );

    // Producers exist for orders, payments and refunds and are released on every path.
    assert_eq!(destination.producers_created().await, 3);
    assert_eq!(destination.producers_closed().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn keyed_records_go_to_the_prefixed_topic() {
    init_test_tracing();
    let source = source_with(&[("sales.Orders", 3)]).await;
    let destination = MemoryDestination::new();
    let mut config = export_config("run-1", &["sales.Orders"], 10);
    config.topic_prefix = "cdc.".to_string();
    config.send_with_key = true;

    let report = run_export(
        config,
        &source,
        &MemoryOffsetStore::new(),
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    assert!(report.is_complete());
    let messages = destination.topic_messages("cdc.orders").await;
    assert_eq!(
        messages
            .iter()
            .map(|message| message.key.clone().unwrap())
            .collect::<Vec<_>>(),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn avro_records_are_framed_with_the_registered_schema_id() {
    init_test_tracing();
    let source = source_with(&[("orders", 4)]).await;
    let destination = MemoryDestination::new();
    let mut config = export_config("run-1", &["orders"], 10);
    config.serialization = SerializationMode::Avro;

    let report = run_export(
        config,
        &source,
        &MemoryOffsetStore::new(),
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    assert!(report.is_complete());
    let (_, schema_id) = destination
        .registered_schema("orders-value")
        .await
        .unwrap();
    let messages = destination.topic_messages("orders").await;
    assert_eq!(messages.len(), 4);
    for message in messages {
        assert_eq!(message.key, None);
        assert_eq!(message.payload[0], 0);
        assert_eq!(&message.payload[1..5], &schema_id.to_be_bytes());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_registration_failure_fails_the_table() {
    init_test_tracing();
    let source = source_with(&[("orders", 4)]).await;
    let destination = MemoryDestination::new();
    destination.fail_schema_registration().await;
    let mut config = export_config("run-1", &["orders"], 10);
    config.serialization = SerializationMode::Avro;

    let report = run_export(
        config,
        &source,
        &MemoryOffsetStore::new(),
        &destination,
        MemoryEventSink::new(),
    )
    .await;

    let Some(TableExportOutcome::Failed { error }) = report.get("orders") else {
        panic!("expected orders to fail");
    };
    assert_eq!(error.kind(), ErrorKind::SchemaRegistryError);
    assert_eq!(destination.producers_created().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn orchestrator_starts_once_and_reports_when_finished() {
    init_test_tracing();
    let source = source_with(&[("orders", 10)]).await;
    let mut orchestrator = ExportOrchestrator::new(
        export_config("run-1", &["orders", "orders"], 100),
        source.clone(),
        MemoryOffsetStore::new(),
        MemoryDestination::new(),
        MemoryEventSink::new(),
    );

    orchestrator.start().unwrap();
    let err = orchestrator.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    tokio::time::timeout(Duration::from_secs(10), async {
        while !orchestrator.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let report = orchestrator.wait().await;
    assert_eq!(report.len(), 1);
    assert_eq!(report.total_published(), 10);
    assert_eq!(
        source.page_requests(&TableName::parse("orders")).await,
        vec![None]
    );
}

#[tokio::test]
async fn unstarted_export_is_finished_and_reports_nothing() {
    let orchestrator = ExportOrchestrator::new(
        export_config("run-1", &["orders"], 100),
        MemorySource::new(),
        MemoryOffsetStore::new(),
        MemoryDestination::new(),
        MemoryEventSink::new(),
    );

    assert!(orchestrator.is_finished());
    assert!(orchestrator.wait().await.is_empty());
}
