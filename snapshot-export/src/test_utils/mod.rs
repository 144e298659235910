//! Helpers for tests that run against a live Postgres server.
//!
//! - [`database`] creates and drops isolated databases configured from `TESTS_DATABASE_*`
//!   environment variables.
pub mod database;
