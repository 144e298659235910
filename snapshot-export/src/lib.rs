//! Resumable full-snapshot export of Postgres tables to a message log.
//!
//! Every configured table is paged through in primary key order and each row is published
//! as an `INSERT` change record to the topic of its table. The last key of every fully
//! published page is checkpointed per execution, so a rerun with the same execution id
//! continues after the last completed page.
//!
//! The entry point is [`orchestrator::ExportOrchestrator`], generic over the
//! [`source::FullLoadSource`], [`store::OffsetStore`], [`publisher::LogDestination`] and
//! [`events::ExportEventSink`] it runs against. In-memory implementations of each are
//! provided for tests.

pub mod concurrency;
pub mod error;
pub mod events;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod migrations;
pub mod orchestrator;
pub mod publisher;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
