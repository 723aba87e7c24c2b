//! Error type of the command layer.

use oxide_shift_core::MigrateError;

use crate::config::ConfigError;

/// Errors returned by the commands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config file problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Planning or execution failed.
    #[error(transparent)]
    Migrate(#[from] MigrateError),

    /// Writing output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Status couldn't be encoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `config` refuses to overwrite an existing file.
    #[error("config file {0:?} already exists")]
    ConfigExists(std::path::PathBuf),
}

/// Result type of the command layer.
pub type Result<T> = std::result::Result<T, Error>;
