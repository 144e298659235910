//! Readers of source tables.

mod base;
mod memory;
mod postgres;

pub use base::FullLoadSource;
pub use memory::MemorySource;
pub use postgres::PgSource;
