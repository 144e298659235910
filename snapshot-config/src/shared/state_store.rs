use serde::{Deserialize, Serialize};

/// Where full-load checkpoints are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Checkpoints live in process memory and are lost on exit.
    #[default]
    Memory,
    /// Checkpoints are stored in the `snapshot_export` schema of the source database.
    Postgres,
}
