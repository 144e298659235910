//! Coordination primitives shared by the orchestrator and its workers.

pub mod shutdown;
