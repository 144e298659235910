//! Snapshot exporter binary.
//!
//! Loads the configuration, sets up logging and metrics and runs the full load of the
//! configured tables into Kafka. Exits with a non-zero status when any table did not
//! complete.

use clap::Parser;
use snapshot_config::shared::ExporterConfig;
use snapshot_config::{Environment, load_config};
use snapshot_telemetry::metrics::init_metrics;
use snapshot_telemetry::tracing::{LogFormat, init_tracing};
use tracing::error;

use crate::core::run_export;

mod core;

/// Exports full snapshots of Postgres tables to Kafka.
#[derive(Debug, Parser)]
#[command(name = "snapshot-exporter", version, about)]
struct Args {
    /// Overrides `export.execution_id`; reusing an id resumes its checkpoints.
    #[arg(long, env = "SNAPSHOT_EXECUTION_ID")]
    execution_id: Option<String>,

    /// Overrides `export.tables` with a comma separated list of tables.
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let environment = Environment::load()?;
    let mut config: ExporterConfig = load_config()?;
    if let Some(execution_id) = args.execution_id {
        config.export.execution_id = execution_id;
    }
    if let Some(tables) = args.tables {
        config.export.tables = tables;
    }
    config.validate()?;

    let log_format = match environment {
        Environment::Prod => LogFormat::Json,
        Environment::Dev => LogFormat::Pretty,
    };
    init_tracing(env!("CARGO_BIN_NAME"), log_format)?;

    init_metrics(&config.export.execution_id)?;

    let all_completed = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_export(config))
        .inspect_err(|err| error!("{err:#}"))?;

    if !all_completed {
        std::process::exit(1);
    }

    Ok(())
}
