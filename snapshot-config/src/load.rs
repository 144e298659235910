use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions probed, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Stem of the configuration file loaded in every environment.
const BASE_FILE_STEM: &str = "base";

/// Prefix of environment variable overrides, e.g. `APP_EXPORT__BATCH_SIZE`.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator between nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";

/// Separator between list elements in environment variable overrides.
const LIST_SEPARATOR: &str = ",";

/// Implemented by top level configuration structures.
pub trait Config {
    /// Keys whose environment variable overrides are split on commas into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate `{stem}` configuration in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to build configuration: {0}")]
    Build(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads configuration from `./configuration` for the environment named by `APP_ENVIRONMENT`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&directory, environment)
}

/// Loads configuration from `directory` for an explicit `environment`.
///
/// The base file is mandatory, the environment file is layered on top when present and
/// environment variables override both. Nested keys use double underscores
/// (`APP_KAFKA__BOOTSTRAP_SERVERS`) and list keys listed in [`Config::LIST_PARSE_KEYS`]
/// are comma-separated.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = locate_file(directory, BASE_FILE_STEM).ok_or_else(|| {
        LoadConfigError::ConfigurationFileMissing {
            stem: BASE_FILE_STEM.to_string(),
            directory: directory.to_path_buf(),
            attempted: attempted_paths(directory, BASE_FILE_STEM),
        }
    })?;

    let mut builder = config::Config::builder().add_source(config::File::from(base_file));
    if let Some(environment_file) = locate_file(directory, environment.as_str()) {
        builder = builder.add_source(config::File::from(environment_file));
    }

    let settings = builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Build)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn environment_overrides<T: Config>() -> config::Environment {
    let mut source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.try_parsing(true).list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}

/// Returns the first existing `<stem>.<ext>` file in `directory`.
fn locate_file(directory: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
}

fn attempted_paths(directory: &Path, stem: &str) -> String {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| format!("`{}`", directory.join(format!("{stem}.{extension}")).display()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        size: usize,
    }

    impl Config for Sample {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("snapshot-config-{label}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = scratch_dir("layered");
        fs::write(dir.join("base.yaml"), "name: base\nsize: 10\n").unwrap();
        fs::write(dir.join("prod.yaml"), "size: 20\n").unwrap();

        let sample: Sample = load_config_from(&dir, Environment::Prod).unwrap();

        assert_eq!(sample.name, "base");
        assert_eq!(sample.size, 20);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn environment_file_is_optional() {
        let dir = scratch_dir("base-only");
        fs::write(dir.join("base.json"), r#"{"name": "json", "size": 3}"#).unwrap();

        let sample: Sample = load_config_from(&dir, Environment::Dev).unwrap();

        assert_eq!(sample.name, "json");
        assert_eq!(sample.size, 3);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_base_file_is_reported() {
        let dir = scratch_dir("empty");

        let err = load_config_from::<Sample>(&dir, Environment::Dev).unwrap_err();

        assert!(matches!(
            err,
            LoadConfigError::ConfigurationFileMissing { ref stem, .. } if stem == "base"
        ));

        fs::remove_dir_all(dir).unwrap();
    }
}
