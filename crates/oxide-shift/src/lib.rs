//! # oxide-shift
//!
//! Move a database to any migration version, forward or backward.
//!
//! This crate ties the pieces of [`oxide_shift_core`] together:
//!
//! - [`config`] - the YAML config file, one entry per database
//! - [`source`] - the `"dir"` migration source (`.sql` files with
//!   `-- +migrate` directives)
//! - [`commands`] - `init`, `status`, `plan`, `goto`, `hack` and `new`
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_shift::{commands, default_registry, Config};
//! use oxide_shift_core::Target;
//!
//! let registry = default_registry()?;
//! let config = Config::load("oxide-shift.yml")?;
//! let db = commands::Database::resolve(&registry, &config, "dev")?;
//!
//! commands::init(&db).await?;
//! commands::goto(&db, &Target::Latest, &mut std::io::stdout()).await?;
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod source;

pub use config::{Config, ConfigError, DbConfig};
pub use error::{Error, Result};
pub use source::{DirSource, DirSourceFactory, SourceError};

use oxide_shift_core::Registry;
use oxide_shift_sqlite::SqliteDriverFactory;

/// A registry with the built-in driver and migration source.
pub fn default_registry() -> oxide_shift_core::Result<Registry> {
    let mut registry = Registry::new();
    registry.register_driver(oxide_shift_sqlite::DRIVER_NAME, SqliteDriverFactory)?;
    registry.register_source(source::SOURCE_NAME, DirSourceFactory)?;
    Ok(registry)
}
