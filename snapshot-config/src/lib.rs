//! Configuration types and loading for the snapshot exporter.
//!
//! Configuration is assembled from `configuration/base.*`, the file matching the current
//! [`Environment`] and `APP_`-prefixed environment variables, in that order.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
