//! YAML config file: one entry per database.
//!
//! ```yaml
//! dev:
//!   driver: sqlite
//!   data_source: "sqlite:dev.db?mode=rwc"
//!   migration_source_params:
//!     path: migrations
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use oxide_shift_core::{MigrateError, Params, Registry};

use crate::source::SOURCE_NAME;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "oxide-shift.yml";

/// Default database entry.
pub const DEFAULT_DB: &str = "dev";

/// Config loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file couldn't be read.
    #[error("error loading config file {path:?}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file isn't valid config YAML.
    #[error("error parsing config file {path:?}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The requested database isn't in the file.
    #[error("DB {db:?} isn't defined in config file {path:?}")]
    UnknownDb {
        /// Requested entry.
        db: String,
        /// Config file path.
        path: PathBuf,
    },

    /// A required field is empty.
    #[error("{0} must be set")]
    MissingField(&'static str),

    /// The driver or migration source isn't registered.
    #[error(transparent)]
    Registry(MigrateError),
}

fn default_migration_source() -> String {
    SOURCE_NAME.to_string()
}

/// Settings of one database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    /// Registered driver name.
    pub driver: String,
    /// Parameters for the driver factory.
    #[serde(default)]
    pub driver_params: Params,
    /// Connection string handed to the driver.
    pub data_source: String,
    /// Registered migration source name.
    #[serde(default = "default_migration_source")]
    pub migration_source: String,
    /// Parameters for the migration source factory.
    #[serde(default)]
    pub migration_source_params: Params,
    /// Plan even if an older migration is missing while a newer one is
    /// forward migrated.
    #[serde(default)]
    pub allow_migration_gaps: bool,
}

impl DbConfig {
    /// Checks the entry against the registered drivers and sources.
    pub fn validate(&self, registry: &Registry) -> Result<(), ConfigError> {
        if self.driver.is_empty() {
            return Err(ConfigError::MissingField("driver"));
        }
        registry.driver(&self.driver).map_err(ConfigError::Registry)?;
        if self.data_source.is_empty() {
            return Err(ConfigError::MissingField("data_source"));
        }
        if self.migration_source.is_empty() {
            return Err(ConfigError::MissingField("migration_source"));
        }
        registry
            .source(&self.migration_source)
            .map_err(ConfigError::Registry)?;
        Ok(())
    }
}

/// A parsed config file.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    dbs: BTreeMap<String, DbConfig>,
}

impl Config {
    /// Reads and parses `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parses `text` as if read from `path`.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, ConfigError> {
        let path = path.into();
        let dbs = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, dbs })
    }

    /// Config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative paths in the config are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// Names of the configured databases.
    pub fn db_names(&self) -> impl Iterator<Item = &str> {
        self.dbs.keys().map(String::as_str)
    }

    /// The entry for `db`, validated against `registry`.
    pub fn db(&self, db: &str, registry: &Registry) -> Result<&DbConfig, ConfigError> {
        let cfg = self.dbs.get(db).ok_or_else(|| ConfigError::UnknownDb {
            db: db.to_string(),
            path: self.path.clone(),
        })?;
        cfg.validate(registry)?;
        Ok(cfg)
    }
}
