//! Persistence of full-load checkpoints.

mod base;
mod memory;
mod postgres;

pub use base::OffsetStore;
pub use memory::MemoryOffsetStore;
pub use postgres::PostgresOffsetStore;
